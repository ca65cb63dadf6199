//! Record placement
//!
//! Best-fit placement of payloads into data pages, in-place resizing, and
//! the OVERFLOW chains that hold payloads too large for one page.

use crate::error::{Result, StoreError};
use crate::page::{
    expect_type, first_free, next, set_first_free, set_next, set_prev, PageType,
    PAGE_HEADER_SIZE,
};

use super::data_page::{footprint, max_inline, DataPage, StoredRecord};
use super::{Location, RecordManager};

impl RecordManager {
    /// Place a payload in a data page and return where it went
    pub(super) fn place(&mut self, payload: &[u8]) -> Result<Location> {
        let needed = footprint(payload.len(), self.page_size);
        let overflow = self.write_overflow(payload)?;

        let page_no = match self.space.best_fit(needed) {
            Some(page_no) => page_no,
            None => self.alloc_page(PageType::UsedPhysical)?,
        };

        let mut page = DataPage::load(self.cache.fetch_mut(page_no)?, page_no)?;
        let slot = page.allocate(needed).ok_or_else(|| {
            StoreError::corruption(format!(
                "data page {} cannot take {} bytes despite its recorded free space",
                page_no, needed
            ))
        })?;
        match overflow {
            Some(first_page) => page.write_stub(slot, payload.len() as u32, first_page),
            None => page.write_inline(slot, payload),
        }
        let free = page.insert_capacity();
        self.space.set(page_no, free);

        Ok(Location {
            page: page_no,
            slot: slot as u16,
        })
    }

    /// Replace the payload at `location`, in place when the page allows.
    /// A record that no longer fits, or that turns from inline into
    /// oversized, moves to a new slot. Returns the record's Location
    /// afterwards.
    pub(super) fn replace(&mut self, location: Location, payload: &[u8]) -> Result<Location> {
        let was_oversized = self.free_overflow_of(location)?;
        let spills = payload.len() > max_inline(self.page_size);
        let slot = location.slot as usize;

        let needed = footprint(payload.len(), self.page_size);
        let page = DataPage::load(self.cache.fetch_mut(location.page)?, location.page)?;
        let fits = page.capacity_of(slot) >= needed;
        if fits && (was_oversized || !spills) {
            let overflow = self.write_overflow(payload)?;
            let mut page = DataPage::new(self.cache.fetch_mut(location.page)?);
            page.resize(slot, needed);
            match overflow {
                Some(first_page) => page.write_stub(slot, payload.len() as u32, first_page),
                None => page.write_inline(slot, payload),
            }
            page.maybe_compact();
            let free = page.insert_capacity();
            self.space.set(location.page, free);
            return Ok(location);
        }

        let moved = self.place(payload)?;
        DataPage::new(self.cache.fetch_mut(location.page)?).remove(slot);
        self.after_removal(location.page)?;
        Ok(moved)
    }

    /// Read the payload stored at `location`
    pub(super) fn read_at(&mut self, location: Location) -> Result<Vec<u8>> {
        let page = DataPage::load(self.cache.fetch(location.page)?, location.page)?;
        let (len, first_page) = match page.read(location.slot as usize) {
            Some(StoredRecord::Inline(bytes)) => return Ok(bytes.to_vec()),
            Some(StoredRecord::Oversized { len, first_page }) => (len, first_page),
            None => return Err(empty_slot(location)),
        };
        self.read_overflow(first_page, len as usize)
    }

    /// Drop the record at `location`
    pub(super) fn erase(&mut self, location: Location) -> Result<()> {
        self.free_overflow_of(location)?;
        DataPage::load(self.cache.fetch_mut(location.page)?, location.page)?
            .remove(location.slot as usize);
        self.after_removal(location.page)
    }

    /// Release an emptied data page, or compact and re-index a partial one
    fn after_removal(&mut self, page_no: u64) -> Result<()> {
        let mut page = DataPage::new(self.cache.fetch_mut(page_no)?);
        if page.is_empty() {
            self.space.remove(page_no);
            return self.release_page(page_no);
        }
        page.maybe_compact();
        let free = page.insert_capacity();
        self.space.set(page_no, free);
        Ok(())
    }

    // =========================================================================
    // Overflow chains
    // =========================================================================

    fn chunk_size(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Write an oversized payload to a fresh OVERFLOW chain. `None` when the
    /// payload fits inline.
    fn write_overflow(&mut self, payload: &[u8]) -> Result<Option<u64>> {
        if payload.len() <= max_inline(self.page_size) {
            return Ok(None);
        }
        if payload.len() > u32::MAX as usize {
            return Err(StoreError::precondition(format!(
                "record of {} bytes exceeds the 4 GiB limit",
                payload.len()
            )));
        }

        let mut first = 0;
        let mut prev = 0;
        for chunk in payload.chunks(self.chunk_size()) {
            let page_no = self.alloc_page(PageType::Overflow)?;
            {
                let buf = self.cache.fetch_mut(page_no)?;
                set_prev(buf, prev);
                buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
                set_first_free(buf, (PAGE_HEADER_SIZE + chunk.len()) as u16);
            }
            if prev != 0 {
                set_next(self.cache.fetch_mut(prev)?, page_no);
            } else {
                first = page_no;
            }
            prev = page_no;
        }
        Ok(Some(first))
    }

    fn read_overflow(&mut self, first_page: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut page_no = first_page;
        while out.len() < len {
            if page_no == 0 {
                return Err(StoreError::corruption(format!(
                    "overflow chain from page {} ends after {} of {} bytes",
                    first_page,
                    out.len(),
                    len
                )));
            }
            let buf = self.cache.fetch(page_no)?;
            expect_type(buf, page_no, PageType::Overflow)?;
            let used = first_free(buf) as usize;
            if used < PAGE_HEADER_SIZE || used > buf.len() {
                return Err(StoreError::corruption(format!(
                    "overflow page {} has bad fill {}",
                    page_no, used
                )));
            }
            out.extend_from_slice(&buf[PAGE_HEADER_SIZE..used]);
            page_no = next(buf);
        }
        out.truncate(len);
        Ok(out)
    }

    /// Pages of the OVERFLOW chain starting at `first_page`
    pub(super) fn overflow_pages(&mut self, first_page: u64) -> Result<Vec<u64>> {
        let mut pages = Vec::new();
        let mut page_no = first_page;
        while page_no != 0 {
            if pages.len() as u64 >= self.page_count {
                return Err(StoreError::corruption("overflow chain has a cycle"));
            }
            let buf = self.cache.fetch(page_no)?;
            expect_type(buf, page_no, PageType::Overflow)?;
            pages.push(page_no);
            page_no = next(buf);
        }
        Ok(pages)
    }

    /// Release the OVERFLOW chain of the record at `location`. Returns
    /// whether the record was oversized.
    fn free_overflow_of(&mut self, location: Location) -> Result<bool> {
        let page = DataPage::load(self.cache.fetch(location.page)?, location.page)?;
        let first_page = match page.read(location.slot as usize) {
            Some(StoredRecord::Oversized { first_page, .. }) => first_page,
            Some(StoredRecord::Inline(_)) => return Ok(false),
            None => return Err(empty_slot(location)),
        };
        for page_no in self.overflow_pages(first_page)? {
            self.release_page(page_no)?;
        }
        Ok(true)
    }
}

fn empty_slot(location: Location) -> StoreError {
    StoreError::corruption(format!(
        "translation points at empty slot {} of page {}",
        location.slot, location.page
    ))
}
