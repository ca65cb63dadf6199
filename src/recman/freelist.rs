//! Free lists
//!
//! Both lists are doubly linked through the `prev`/`next` words of the
//! generic page header, anchored by head/tail in the HEADER page. Pushes
//! and pops work at the head.
//!
//! - FREE-PHYSICAL: whole unused pages. An empty list extends the file.
//! - FREE-LOGICAL: pages holding a stack of released recids after the page
//!   header (`first_free = 20 + 8 * count`). A page goes back to the
//!   physical list once its stack is empty.

use crate::error::{Result, StoreError};
use crate::page::{
    expect_type, first_free, init_page, next, read_u64, set_first_free, set_next, set_prev,
    write_u64, PageType, MAX_PAGES, PAGE_HEADER_SIZE,
};

use super::RecordManager;

const RECID_SIZE: usize = 8;

/// Number of recids on a FREE-LOGICAL page
pub(super) fn stack_len(page: &[u8]) -> usize {
    (first_free(page) as usize).saturating_sub(PAGE_HEADER_SIZE) / RECID_SIZE
}

impl RecordManager {
    // =========================================================================
    // Physical pages
    // =========================================================================

    /// Take a page off the physical free list, or extend the file, and
    /// stamp it with a fresh header of `page_type`.
    pub(super) fn alloc_page(&mut self, page_type: PageType) -> Result<u64> {
        let head = self.header.free_physical_head;
        if head != 0 {
            let buf = self.cache.fetch(head)?;
            expect_type(buf, head, PageType::FreePhysical)?;
            let successor = next(buf);

            if successor != 0 {
                set_prev(self.cache.fetch_mut(successor)?, 0);
            } else {
                self.header.free_physical_tail = 0;
            }
            self.header.free_physical_head = successor;

            init_page(self.cache.fetch_mut(head)?, page_type);
            tracing::trace!(page = head, ?page_type, "reused free page");
            return Ok(head);
        }

        let page_no = self.page_count;
        if page_no >= MAX_PAGES {
            return Err(StoreError::Capacity(format!(
                "file already holds {} pages",
                page_no
            )));
        }
        init_page(self.cache.create(page_no)?, page_type);
        self.page_count += 1;
        tracing::trace!(page = page_no, ?page_type, "extended file");
        Ok(page_no)
    }

    /// Put a page back on the physical free list
    pub(super) fn release_page(&mut self, page_no: u64) -> Result<()> {
        let head = self.header.free_physical_head;
        {
            let buf = self.cache.fetch_mut(page_no)?;
            init_page(buf, PageType::FreePhysical);
            set_next(buf, head);
        }

        if head != 0 {
            set_prev(self.cache.fetch_mut(head)?, page_no);
        } else {
            self.header.free_physical_tail = page_no;
        }
        self.header.free_physical_head = page_no;
        tracing::trace!(page = page_no, "released page");
        Ok(())
    }

    // =========================================================================
    // Logical ids
    // =========================================================================

    fn logical_capacity(&self) -> usize {
        (self.page_size - PAGE_HEADER_SIZE) / RECID_SIZE
    }

    /// Remember a released recid for reuse
    pub(super) fn push_free_recid(&mut self, recid: u64) -> Result<()> {
        let head = self.header.free_logical_head;
        if head != 0 {
            let buf = self.cache.fetch(head)?;
            expect_type(buf, head, PageType::FreeLogical)?;
            let count = stack_len(buf);
            if count < self.logical_capacity() {
                let buf = self.cache.fetch_mut(head)?;
                write_u64(buf, PAGE_HEADER_SIZE + RECID_SIZE * count, recid);
                set_first_free(buf, (PAGE_HEADER_SIZE + RECID_SIZE * (count + 1)) as u16);
                return Ok(());
            }
        }

        let page_no = self.alloc_page(PageType::FreeLogical)?;
        {
            let buf = self.cache.fetch_mut(page_no)?;
            set_next(buf, head);
            write_u64(buf, PAGE_HEADER_SIZE, recid);
            set_first_free(buf, (PAGE_HEADER_SIZE + RECID_SIZE) as u16);
        }
        if head != 0 {
            set_prev(self.cache.fetch_mut(head)?, page_no);
        } else {
            self.header.free_logical_tail = page_no;
        }
        self.header.free_logical_head = page_no;
        Ok(())
    }

    /// Most recently released recid, if any
    pub(super) fn pop_free_recid(&mut self) -> Result<Option<u64>> {
        let head = self.header.free_logical_head;
        if head == 0 {
            return Ok(None);
        }

        let buf = self.cache.fetch(head)?;
        expect_type(buf, head, PageType::FreeLogical)?;
        let count = stack_len(buf);
        if count == 0 {
            return Err(StoreError::corruption(format!(
                "empty free-logical page {} left on its list",
                head
            )));
        }
        let recid = read_u64(buf, PAGE_HEADER_SIZE + RECID_SIZE * (count - 1));
        let successor = next(buf);

        if count == 1 {
            if successor != 0 {
                set_prev(self.cache.fetch_mut(successor)?, 0);
            } else {
                self.header.free_logical_tail = 0;
            }
            self.header.free_logical_head = successor;
            self.release_page(head)?;
        } else {
            let buf = self.cache.fetch_mut(head)?;
            set_first_free(buf, (PAGE_HEADER_SIZE + RECID_SIZE * (count - 1)) as u16);
        }
        Ok(Some(recid))
    }
}
