//! Structural integrity check
//!
//! Walks the free lists, the translation chain and every live record and
//! cross-checks them: a page on a free list must not back any live record,
//! no page may be claimed twice, and every live recid must resolve to a
//! readable record.

use std::collections::HashMap;

use crate::error::Result;
use crate::page::{expect_type, next, page_type, read_u64, PageType, PAGE_HEADER_SIZE};

use super::data_page::{DataPage, StoredRecord};
use super::freelist::stack_len;
use super::translation::{make_recid, slots_per_page};
use super::{Location, RecordManager};

/// What `check_integrity` found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub page_count: u64,
    pub free_physical_pages: u64,
    pub free_logical_pages: u64,
    pub free_recids: u64,
    pub translation_pages: u64,
    pub data_pages: u64,
    pub overflow_pages: u64,
    pub live_records: u64,
    /// Human-readable description of every inconsistency
    pub problems: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Role a page plays, for double-claim detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Header,
    FreePhysical,
    FreeLogical,
    Translation,
    Data,
    Overflow(u64),
}

struct Claims {
    owners: HashMap<u64, Claim>,
}

impl Claims {
    fn claim(&mut self, page_no: u64, claim: Claim, report: &mut IntegrityReport) -> bool {
        match self.owners.get(&page_no) {
            Some(existing) if *existing == claim => false,
            Some(existing) => {
                report.problems.push(format!(
                    "page {} is both {:?} and {:?}",
                    page_no, existing, claim
                ));
                false
            }
            None => {
                self.owners.insert(page_no, claim);
                true
            }
        }
    }
}

impl RecordManager {
    pub(super) fn integrity_report(&mut self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            page_count: self.page_count,
            ..Default::default()
        };
        let mut claims = Claims {
            owners: HashMap::new(),
        };
        claims.claim(0, Claim::Header, &mut report);

        // physical free list
        for page_no in self.walk_list(self.header.free_physical_head, PageType::FreePhysical, &mut report)? {
            if claims.claim(page_no, Claim::FreePhysical, &mut report) {
                report.free_physical_pages += 1;
            }
        }

        // logical free list
        let mut free_recids = Vec::new();
        for page_no in self.walk_list(self.header.free_logical_head, PageType::FreeLogical, &mut report)? {
            if claims.claim(page_no, Claim::FreeLogical, &mut report) {
                report.free_logical_pages += 1;
            }
            let buf = self.cache.fetch(page_no)?;
            for i in 0..stack_len(buf) {
                free_recids.push(read_u64(buf, PAGE_HEADER_SIZE + 8 * i));
            }
        }
        report.free_recids = free_recids.len() as u64;

        // translation chain
        for page_no in self.translation.clone() {
            if claims.claim(page_no, Claim::Translation, &mut report) {
                report.translation_pages += 1;
            }
        }

        // live records
        let per_page = slots_per_page(self.page_size) as usize;
        for index in 0..self.translation.len() {
            for slot in 0..per_page {
                let recid = make_recid(index, slot);
                if recid == 0 || recid >= self.header.next_recid {
                    continue;
                }
                let Some(location) = self.locate(recid)? else {
                    continue;
                };
                report.live_records += 1;
                self.check_record(recid, location, &mut claims, &mut report)?;
            }
        }

        for recid in free_recids {
            match self.locate(recid) {
                Ok(None) => {}
                Ok(Some(_)) => report
                    .problems
                    .push(format!("recid {} is live but also on the free list", recid)),
                Err(_) => report
                    .problems
                    .push(format!("free list holds unknown recid {}", recid)),
            }
        }

        report.data_pages = claims
            .owners
            .values()
            .filter(|claim| **claim == Claim::Data)
            .count() as u64;
        report.overflow_pages = claims
            .owners
            .values()
            .filter(|claim| matches!(claim, Claim::Overflow(_)))
            .count() as u64;

        for (&page_no, claim) in &claims.owners {
            if page_no >= self.page_count {
                report
                    .problems
                    .push(format!("{:?} page {} lies past the end of the file", claim, page_no));
            }
        }

        Ok(report)
    }

    fn check_record(
        &mut self,
        recid: u64,
        location: Location,
        claims: &mut Claims,
        report: &mut IntegrityReport,
    ) -> Result<()> {
        if location.page == 0 || location.page >= self.page_count {
            report.problems.push(format!(
                "recid {} points outside the file at page {}",
                recid, location.page
            ));
            return Ok(());
        }
        claims.claim(location.page, Claim::Data, report);

        let buf = self.cache.fetch(location.page)?;
        if page_type(buf).ok() != Some(PageType::UsedPhysical) {
            report.problems.push(format!(
                "recid {} points at page {} which is not a data page",
                recid, location.page
            ));
            return Ok(());
        }
        let page = match DataPage::load(buf, location.page) {
            Ok(page) => page,
            Err(e) => {
                report.problems.push(format!("recid {}: {}", recid, e));
                return Ok(());
            }
        };
        let first_page = match page.read(location.slot as usize) {
            Some(StoredRecord::Inline(_)) => return Ok(()),
            Some(StoredRecord::Oversized { first_page, .. }) => first_page,
            None => {
                report.problems.push(format!(
                    "recid {} points at empty slot {} of page {}",
                    recid, location.slot, location.page
                ));
                return Ok(());
            }
        };

        match self.overflow_pages(first_page) {
            Ok(pages) => {
                for page_no in pages {
                    claims.claim(page_no, Claim::Overflow(recid), report);
                }
            }
            Err(e) => report
                .problems
                .push(format!("overflow chain of recid {}: {}", recid, e)),
        }
        Ok(())
    }

    /// Follow a free list, reporting cycles and mistyped pages
    fn walk_list(
        &mut self,
        head: u64,
        expected: PageType,
        report: &mut IntegrityReport,
    ) -> Result<Vec<u64>> {
        let mut pages = Vec::new();
        let mut page_no = head;
        while page_no != 0 {
            if page_no >= self.page_count || pages.len() as u64 >= self.page_count {
                report
                    .problems
                    .push(format!("{:?} list runs off at page {}", expected, page_no));
                break;
            }
            let buf = self.cache.fetch(page_no)?;
            if let Err(e) = expect_type(buf, page_no, expected) {
                report.problems.push(e.to_string());
                break;
            }
            pages.push(page_no);
            page_no = next(buf);
        }
        Ok(pages)
    }
}
