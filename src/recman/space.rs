//! Free-space map
//!
//! In-memory index of data pages by the largest record footprint they can
//! still take, used for best-fit placement. It is derived state: rebuilt
//! from a page scan at open, snapshotted at commit and restored on rollback.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct FreeSpaceMap {
    /// (insert capacity, page) ordered for range queries
    by_free: BTreeSet<(usize, u64)>,
    pages: HashMap<u64, usize>,
}

impl FreeSpaceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the insert capacity of a data page
    pub fn set(&mut self, page_no: u64, free: usize) {
        if let Some(old) = self.pages.insert(page_no, free) {
            self.by_free.remove(&(old, page_no));
        }
        self.by_free.insert((free, page_no));
    }

    /// Forget a page that stopped being a data page
    pub fn remove(&mut self, page_no: u64) {
        if let Some(old) = self.pages.remove(&page_no) {
            self.by_free.remove(&(old, page_no));
        }
    }

    /// Page with the least free space that still holds `needed` bytes.
    /// Ties go to the lowest page number.
    pub fn best_fit(&self, needed: usize) -> Option<u64> {
        self.by_free
            .range((needed, 0)..)
            .next()
            .map(|&(_, page_no)| page_no)
    }

    pub fn free_of(&self, page_no: u64) -> Option<usize> {
        self.pages.get(&page_no).copied()
    }

    pub fn contains(&self, page_no: u64) -> bool {
        self.pages.contains_key(&page_no)
    }

    /// Number of tracked data pages
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total free bytes across all data pages
    pub fn total_free(&self) -> usize {
        self.pages.values().sum()
    }
}
