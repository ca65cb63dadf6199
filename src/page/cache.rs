//! Page Cache
//!
//! Bounded set of page buffers in front of the `PagedFile`.
//!
//! ## Policy
//! - Clean pages are evicted least-recently-used first
//! - Dirty pages stay resident until commit or rollback (no-steal), unless
//!   stealing is enabled because the store runs without a transaction log
//! - A page counts as pinned while the borrow returned by `fetch`/`fetch_mut`
//!   is alive, so eviction can never pull a page out from under a caller
//!
//! ## Fetch, dirty, release
//! The borrow plays the role of the pin. `fetch` and `fetch_mut` pin the
//! page for as long as the returned slice lives, and dropping the slice
//! releases it; there is no separate `release` call. `fetch_mut` marks the
//! page dirty; `dirty` does the same for a resident page fetched earlier.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, StoreError};

use super::PagedFile;

/// A resident page buffer
struct Frame {
    data: Box<[u8]>,
    dirty: bool,
    /// Last access tick, key into `lru` while the frame is clean
    tick: u64,
}

/// LRU page cache with dirty tracking
pub struct PageCache {
    file: PagedFile,
    frames: HashMap<u64, Frame>,
    /// Clean frames ordered by last access: tick -> page_no
    lru: BTreeMap<u64, u64>,
    tick: u64,
    capacity: usize,
    /// Write back dirty pages on eviction (transaction log disabled)
    allow_steal: bool,
    overflow_warned: bool,
}

impl PageCache {
    pub fn new(file: PagedFile, capacity: usize, allow_steal: bool) -> Self {
        Self {
            file,
            frames: HashMap::with_capacity(capacity),
            lru: BTreeMap::new(),
            tick: 0,
            capacity,
            allow_steal,
            overflow_warned: false,
        }
    }

    /// Borrow a page for reading, loading it from disk on a miss
    pub fn fetch(&mut self, page_no: u64) -> Result<&[u8]> {
        self.load(page_no)?;
        self.touch(page_no);
        self.frames
            .get(&page_no)
            .map(|frame| &frame.data[..])
            .ok_or_else(|| StoreError::corruption(format!("page {} vanished from cache", page_no)))
    }

    /// Borrow a page for writing; the page becomes dirty
    pub fn fetch_mut(&mut self, page_no: u64) -> Result<&mut [u8]> {
        self.load(page_no)?;
        self.touch(page_no);
        self.dirty(page_no)?;
        self.frames
            .get_mut(&page_no)
            .map(|frame| &mut frame.data[..])
            .ok_or_else(|| StoreError::corruption(format!("page {} vanished from cache", page_no)))
    }

    /// Mark a resident page as modified
    pub fn dirty(&mut self, page_no: u64) -> Result<()> {
        let frame = self.frames.get_mut(&page_no).ok_or_else(|| {
            StoreError::precondition(format!("page {} is not resident", page_no))
        })?;
        if !frame.dirty {
            frame.dirty = true;
            self.lru.remove(&frame.tick);
        }
        Ok(())
    }

    /// Add a zeroed, dirty page that does not exist on disk yet
    pub fn create(&mut self, page_no: u64) -> Result<&mut [u8]> {
        if let Some(frame) = self.frames.get(&page_no) {
            if !frame.dirty {
                self.lru.remove(&frame.tick);
            }
        } else {
            self.make_room()?;
        }

        self.tick += 1;
        let frame = Frame {
            data: vec![0u8; self.file.page_size()].into_boxed_slice(),
            dirty: true,
            tick: self.tick,
        };
        self.frames.insert(page_no, frame);
        self.frames
            .get_mut(&page_no)
            .map(|frame| &mut frame.data[..])
            .ok_or_else(|| StoreError::corruption(format!("page {} vanished from cache", page_no)))
    }

    /// Page numbers and images of every dirty page, in page order
    pub fn dirty_pages(&self) -> Vec<(u64, &[u8])> {
        let mut pages: Vec<(u64, &[u8])> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(&page_no, frame)| (page_no, &frame.data[..]))
            .collect();
        pages.sort_by_key(|(page_no, _)| *page_no);
        pages
    }

    pub fn dirty_count(&self) -> usize {
        self.frames.values().filter(|frame| frame.dirty).count()
    }

    /// Write every dirty page to the main file and fsync it.
    ///
    /// Pages stay dirty until `mark_clean`, so a failure part-way leaves
    /// the cache unchanged.
    pub fn sync(&mut self) -> Result<usize> {
        let mut dirty: Vec<u64> = self
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(&page_no, _)| page_no)
            .collect();
        dirty.sort_unstable();

        for page_no in &dirty {
            if let Some(frame) = self.frames.get(page_no) {
                self.file.write_page(*page_no, &frame.data)?;
            }
        }
        self.file.sync()?;
        Ok(dirty.len())
    }

    /// Forget that resident pages differ from disk (after a successful commit)
    pub fn mark_clean(&mut self) {
        for (&page_no, frame) in self.frames.iter_mut() {
            if frame.dirty {
                frame.dirty = false;
                self.lru.insert(frame.tick, page_no);
            }
        }
        self.overflow_warned = false;
    }

    /// Drop every dirty page so the next fetch re-reads the committed image
    pub fn discard_dirty(&mut self) -> usize {
        let before = self.frames.len();
        self.frames.retain(|_, frame| !frame.dirty);
        self.overflow_warned = false;
        before - self.frames.len()
    }

    /// Number of resident pages
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn file(&self) -> &PagedFile {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut PagedFile {
        &mut self.file
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn load(&mut self, page_no: u64) -> Result<()> {
        if self.frames.contains_key(&page_no) {
            return Ok(());
        }
        self.make_room()?;

        let mut data = vec![0u8; self.file.page_size()].into_boxed_slice();
        self.file.read_page(page_no, &mut data)?;
        self.tick += 1;
        self.lru.insert(self.tick, page_no);
        self.frames.insert(
            page_no,
            Frame {
                data,
                dirty: false,
                tick: self.tick,
            },
        );
        Ok(())
    }

    fn touch(&mut self, page_no: u64) {
        self.tick += 1;
        if let Some(frame) = self.frames.get_mut(&page_no) {
            if !frame.dirty {
                self.lru.remove(&frame.tick);
                self.lru.insert(self.tick, page_no);
            }
            frame.tick = self.tick;
        }
    }

    /// Evict until there is room for one more frame
    fn make_room(&mut self) -> Result<()> {
        while self.frames.len() >= self.capacity {
            if let Some((&tick, &victim)) = self.lru.iter().next() {
                self.lru.remove(&tick);
                self.frames.remove(&victim);
                tracing::trace!(page = victim, "evicted clean page");
                continue;
            }

            if self.allow_steal {
                let victim = self
                    .frames
                    .iter()
                    .min_by_key(|(_, frame)| frame.tick)
                    .map(|(&page_no, _)| page_no);
                if let Some(victim) = victim {
                    if let Some(frame) = self.frames.remove(&victim) {
                        self.file.write_page(victim, &frame.data)?;
                        tracing::trace!(page = victim, "wrote back dirty page on eviction");
                    }
                    continue;
                }
            }

            if !self.overflow_warned {
                tracing::warn!(
                    capacity = self.capacity,
                    dirty = self.dirty_count(),
                    "page cache is full of dirty pages; commit to release them"
                );
                self.overflow_warned = true;
            }
            break;
        }
        Ok(())
    }
}
