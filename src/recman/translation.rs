//! Translation pages
//!
//! A recid is `translation_index << 12 | slot`. The index picks a page in
//! the translation chain (HEADER head/tail, linked by `next`), the slot a
//! u64 after the page header holding `page << 16 | data slot`, 0 if unused.
//! Pages are appended on demand as fresh recids are handed out.

use crate::error::{Result, StoreError};
use crate::page::{
    expect_type, next, read_u64, set_next, set_prev, write_u64, PageCache, PageType,
    PAGE_HEADER_SIZE,
};

use super::header::Header;
use super::{Location, RecordManager};

const SLOT_BITS: u32 = 12;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;
const ENTRY_SIZE: usize = 8;

/// Recid slots per translation page
pub(super) fn slots_per_page(page_size: usize) -> u64 {
    ((page_size - PAGE_HEADER_SIZE) / ENTRY_SIZE) as u64
}

pub(super) fn split_recid(recid: u64) -> (usize, usize) {
    ((recid >> SLOT_BITS) as usize, (recid & SLOT_MASK) as usize)
}

pub(super) fn make_recid(index: usize, slot: usize) -> u64 {
    ((index as u64) << SLOT_BITS) | slot as u64
}

/// Follow the translation chain from the HEADER page
pub(super) fn load_chain(cache: &mut PageCache, header: &Header, page_count: u64) -> Result<Vec<u64>> {
    let mut pages = Vec::new();
    let mut page_no = header.translation_head;
    while page_no != 0 {
        if pages.len() as u64 >= page_count {
            return Err(StoreError::corruption("translation chain has a cycle"));
        }
        let buf = cache.fetch(page_no)?;
        expect_type(buf, page_no, PageType::Translation)?;
        pages.push(page_no);
        page_no = next(buf);
    }
    if pages.last().copied().unwrap_or(0) != header.translation_tail {
        return Err(StoreError::corruption(
            "translation chain does not end at the recorded tail",
        ));
    }
    Ok(pages)
}

impl RecordManager {
    /// Translation page and byte offset of a recid's entry
    fn entry_of(&self, recid: u64) -> Result<(u64, usize)> {
        let (index, slot) = split_recid(recid);
        let page_no = self.translation.get(index).copied();
        match page_no {
            Some(page_no)
                if recid != 0
                    && recid < self.header.next_recid
                    && (slot as u64) < slots_per_page(self.page_size) =>
            {
                Ok((page_no, PAGE_HEADER_SIZE + ENTRY_SIZE * slot))
            }
            _ => Err(StoreError::precondition(format!("unknown recid {}", recid))),
        }
    }

    /// Current Location of a recid; `None` once it was deleted
    pub(crate) fn locate(&mut self, recid: u64) -> Result<Option<Location>> {
        let (page_no, offset) = self.entry_of(recid)?;
        let packed = read_u64(self.cache.fetch(page_no)?, offset);
        Ok(Location::unpack(packed))
    }

    pub(super) fn set_location(&mut self, recid: u64, location: Option<Location>) -> Result<()> {
        let (page_no, offset) = self.entry_of(recid)?;
        let packed = location.map(Location::pack).unwrap_or(0);
        write_u64(self.cache.fetch_mut(page_no)?, offset, packed);
        Ok(())
    }

    /// A released recid if one is waiting, otherwise a never-used one
    pub(super) fn allocate_recid(&mut self) -> Result<u64> {
        if let Some(recid) = self.pop_free_recid()? {
            return Ok(recid);
        }

        let recid = self.header.next_recid;
        let (index, slot) = split_recid(recid);
        if index == self.translation.len() {
            self.append_translation_page()?;
        } else if index > self.translation.len() {
            return Err(StoreError::corruption(format!(
                "next recid {} is past the translation chain",
                recid
            )));
        }

        self.header.next_recid = if (slot as u64 + 1) < slots_per_page(self.page_size) {
            recid + 1
        } else {
            make_recid(index + 1, 0)
        };
        Ok(recid)
    }

    fn append_translation_page(&mut self) -> Result<()> {
        let page_no = self.alloc_page(PageType::Translation)?;
        let tail = self.header.translation_tail;
        set_prev(self.cache.fetch_mut(page_no)?, tail);
        if tail != 0 {
            set_next(self.cache.fetch_mut(tail)?, page_no);
        } else {
            self.header.translation_head = page_no;
        }
        self.header.translation_tail = page_no;
        self.translation.push(page_no);
        tracing::debug!(page = page_no, index = self.translation.len() - 1, "added translation page");
        Ok(())
    }
}
