//! Record Manager Module
//!
//! Variable-length records addressed by stable recids, stored in the pages
//! of one main file and made atomic by the transaction log.
//!
//! ## Responsibilities
//! - Hand out recids and resolve them through translation pages
//! - Place records in slotted data pages (best fit) or overflow chains
//! - Keep the physical and logical free lists in the HEADER page
//! - Commit dirty pages through the log, or roll them back
//! - Poison itself after I/O or corruption errors
//!
//! ## Main File Layout
//! ```text
//! ┌────────┬─────────────┬──────────┬──────────┬──────────┬─────┐
//! │ HEADER │ TRANSLATION │ DATA     │ DATA     │ FREE     │ ... │
//! │ page 0 │ page        │ page     │ page     │ page     │     │
//! └────────┴─────────────┴──────────┴──────────┴──────────┴─────┘
//! ```

mod compress;
mod data_page;
mod freelist;
mod header;
mod integrity;
mod named_roots;
mod records;
mod space;
mod translation;

use std::path::{Path, PathBuf};

use crate::config::{Compression, Options};
use crate::error::{Result, StoreError};
use crate::page::{PageCache, PagedFile, PageType};
use crate::serializer::{from_bytes, to_bytes, Serializer};
use crate::wal::{LogRecovery, LogWriter};

use data_page::DataPage;
use header::Header;
use named_roots::NamedRoots;
use space::FreeSpaceMap;

pub use integrity::IntegrityReport;

/// Physical position of a record: data page and slot directory index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Location {
    pub page: u64,
    pub slot: u16,
}

impl Location {
    fn pack(self) -> u64 {
        (self.page << 16) | self.slot as u64
    }

    fn unpack(packed: u64) -> Option<Self> {
        if packed == 0 {
            return None;
        }
        Some(Self {
            page: packed >> 16,
            slot: packed as u16,
        })
    }
}

/// Path of the transaction log kept next to `path`
pub fn log_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".log");
    PathBuf::from(name)
}

/// Record manager over one main file and its log
pub struct RecordManager {
    path: PathBuf,
    cache: PageCache,
    log: Option<LogWriter>,

    // Working state, and its image as of the last commit
    header: Header,
    committed_header: Header,
    translation: Vec<u64>,
    committed_translation: Vec<u64>,
    space: FreeSpaceMap,
    committed_space: FreeSpaceMap,
    page_count: u64,
    committed_page_count: u64,

    page_size: usize,
    readonly: bool,
    transactions: bool,
    poisoned: bool,

    /// Transaction counter, bumped by every commit and rollback
    txn: u64,
    rolled_back: Vec<u64>,
}

impl RecordManager {
    /// Open the store at `path`, creating it unless `options.readonly` is set.
    /// A committed transaction left in the log is replayed first.
    pub fn open(path: impl AsRef<Path>, options: &Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let log_path = log_path(&path);

        let exists = std::fs::metadata(&path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if options.readonly && !exists {
            return Err(StoreError::precondition(format!(
                "{} does not exist and cannot be created read-only",
                path.display()
            )));
        }

        let requested = options.page_size as usize;
        let page_size = if exists {
            Header::peek_page_size(&path)?.unwrap_or(requested)
        } else {
            requested
        };
        if page_size != requested {
            tracing::warn!(
                stored = page_size,
                requested,
                "existing store keeps its page size"
            );
        }

        let pending_log = std::fs::metadata(&log_path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if pending_log {
            if options.readonly {
                return Err(StoreError::precondition(
                    "transaction log needs recovery; open the store read-write first",
                ));
            }
            let mut file = PagedFile::open(&path, page_size, false)?;
            LogRecovery::replay(&log_path, &mut file)?;
        }

        let file = PagedFile::open(&path, page_size, options.readonly)?;
        let transactions = !options.transaction_disable;
        let log = if transactions && !options.readonly {
            Some(LogWriter::open(&log_path)?)
        } else {
            None
        };
        let page_count = file.page_count()?;
        let mut cache = PageCache::new(file, options.cache_pages as usize, !transactions);

        let fresh = page_count == 0;
        let (header, translation, space) = if fresh {
            (
                Header::new(page_size, options.compression),
                Vec::new(),
                FreeSpaceMap::new(),
            )
        } else {
            let header = Header::decode(cache.fetch(0)?)?;
            let translation = translation::load_chain(&mut cache, &header, page_count)?;
            let space = scan_data_pages(cache.file_mut(), page_count)?;
            (header, translation, space)
        };

        if !fresh && header.compression != options.compression {
            tracing::warn!(
                stored = ?header.compression,
                requested = ?options.compression,
                "existing store keeps its compression codec"
            );
        }

        let mut manager = Self {
            path,
            cache,
            log,
            committed_header: header.clone(),
            header,
            committed_translation: translation.clone(),
            translation,
            committed_space: space.clone(),
            space,
            page_count: page_count.max(1),
            committed_page_count: page_count,
            page_size,
            readonly: options.readonly,
            transactions,
            poisoned: false,
            txn: 0,
            rolled_back: Vec::new(),
        };

        if fresh {
            manager.header.encode(manager.cache.create(0)?);
            manager.commit_inner()?;
            tracing::info!(path = %manager.path.display(), page_size, "created store");
        } else {
            tracing::info!(
                path = %manager.path.display(),
                page_size,
                pages = page_count,
                data_pages = manager.space.len(),
                "opened store"
            );
        }
        Ok(manager)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Store a new record and return its recid
    pub fn insert_bytes(&mut self, data: &[u8]) -> Result<u64> {
        self.ensure_writable()?;
        let result = self.insert_inner(data);
        self.track(result)
    }

    pub fn insert<T>(&mut self, value: &T, serializer: &dyn Serializer<T>) -> Result<u64> {
        let bytes = to_bytes(serializer, value)?;
        self.insert_bytes(&bytes)
    }

    /// Read a record. `None` when the recid was deleted.
    pub fn fetch_bytes(&mut self, recid: u64) -> Result<Option<Vec<u8>>> {
        self.ensure_usable()?;
        let result = self.fetch_inner(recid);
        self.track(result)
    }

    pub fn fetch<T>(&mut self, recid: u64, serializer: &dyn Serializer<T>) -> Result<Option<T>> {
        match self.fetch_bytes(recid)? {
            Some(bytes) => from_bytes(serializer, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Replace a record's content; its recid never changes
    pub fn update_bytes(&mut self, recid: u64, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let result = self.update_inner(recid, data);
        self.track(result)
    }

    pub fn update<T>(&mut self, recid: u64, value: &T, serializer: &dyn Serializer<T>) -> Result<()> {
        let bytes = to_bytes(serializer, value)?;
        self.update_bytes(recid, &bytes)
    }

    /// Remove a record and release its recid for reuse
    pub fn delete(&mut self, recid: u64) -> Result<()> {
        self.ensure_writable()?;
        let result = self.delete_inner(recid);
        self.track(result)
    }

    fn insert_inner(&mut self, data: &[u8]) -> Result<u64> {
        let payload = compress::encode(self.header.compression, data)?;
        let recid = self.allocate_recid()?;
        let location = self.place(&payload)?;
        self.set_location(recid, Some(location))?;
        Ok(recid)
    }

    fn fetch_inner(&mut self, recid: u64) -> Result<Option<Vec<u8>>> {
        let Some(location) = self.locate(recid)? else {
            return Ok(None);
        };
        let stored = self.read_at(location)?;
        compress::decode(self.header.compression, &stored).map(Some)
    }

    fn update_inner(&mut self, recid: u64, data: &[u8]) -> Result<()> {
        let location = self.live_location(recid)?;
        let payload = compress::encode(self.header.compression, data)?;
        let moved = self.replace(location, &payload)?;
        if moved != location {
            self.set_location(recid, Some(moved))?;
        }
        Ok(())
    }

    fn delete_inner(&mut self, recid: u64) -> Result<()> {
        let location = self.live_location(recid)?;
        self.erase(location)?;
        self.set_location(recid, None)?;
        self.push_free_recid(recid)
    }

    fn live_location(&mut self, recid: u64) -> Result<Location> {
        self.locate(recid)?
            .ok_or_else(|| StoreError::precondition(format!("record {} was deleted", recid)))
    }

    // =========================================================================
    // Named roots
    // =========================================================================

    /// Recid bound to `name`, if any
    pub fn named_root(&mut self, name: &str) -> Result<Option<u64>> {
        Ok(self.load_named_roots()?.get(name))
    }

    /// Bind `name` to `recid`; recid 0 removes the binding
    pub fn set_named_root(&mut self, name: &str, recid: u64) -> Result<()> {
        self.ensure_writable()?;
        let mut roots = self.load_named_roots()?;
        roots.set(name, recid);
        let bytes = roots.encode();

        let result = if self.header.named_roots == 0 {
            self.insert_inner(&bytes).map(|recid| {
                self.header.named_roots = recid;
            })
        } else {
            self.update_inner(self.header.named_roots, &bytes)
        };
        self.track(result)
    }

    /// Every `(name, recid)` binding, sorted by name
    pub fn named_roots(&mut self) -> Result<Vec<(String, u64)>> {
        Ok(self.load_named_roots()?.entries().to_vec())
    }

    fn load_named_roots(&mut self) -> Result<NamedRoots> {
        if self.header.named_roots == 0 {
            self.ensure_usable()?;
            return Ok(NamedRoots::default());
        }
        match self.fetch_bytes(self.header.named_roots)? {
            Some(bytes) => NamedRoots::decode(&bytes),
            None => Err(StoreError::corruption("named root record is missing")),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Make every change since the last commit durable
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.readonly {
            return Ok(());
        }
        let result = self.commit_inner();
        self.track(result)
    }

    fn commit_inner(&mut self) -> Result<()> {
        if self.header != self.committed_header || self.committed_page_count == 0 {
            let page = self.cache.fetch_mut(0)?;
            self.header.encode(page);
        }

        let dirty = self.cache.dirty_count();
        if dirty > 0 {
            if let Some(log) = self.log.as_mut() {
                let bytes = log.write_transaction(&self.cache.dirty_pages())?;
                tracing::trace!(bytes, "log written");
            }
            self.cache.sync()?;
            if let Some(log) = self.log.as_mut() {
                log.truncate()?;
            }
            self.cache.mark_clean();
        }

        self.committed_header = self.header.clone();
        self.committed_translation = self.translation.clone();
        self.committed_space = self.space.clone();
        self.committed_page_count = self.page_count;
        self.txn += 1;
        tracing::debug!(txn = self.txn, pages = dirty, "committed");
        Ok(())
    }

    /// Discard every change since the last commit. Accepted on a poisoned
    /// manager, which stays poisoned.
    pub fn rollback(&mut self) -> Result<()> {
        if !self.transactions {
            return Err(StoreError::precondition(
                "rollback is unavailable with the transaction log disabled",
            ));
        }

        let discarded = self.cache.discard_dirty();
        self.header = self.committed_header.clone();
        self.translation = self.committed_translation.clone();
        self.space = self.committed_space.clone();
        self.page_count = self.committed_page_count;
        self.rolled_back.push(self.txn);
        self.txn += 1;
        tracing::debug!(txn = self.txn, pages = discarded, "rolled back");
        Ok(())
    }

    /// Commit pending work (unless poisoned or read-only) and release the files
    pub fn close(mut self) -> Result<()> {
        let result = if self.poisoned || self.readonly {
            Ok(())
        } else {
            self.commit_inner()
        };
        tracing::info!(path = %self.path.display(), "closed store");
        result
    }

    /// Identifier of the transaction in progress
    pub fn txn_id(&self) -> u64 {
        self.txn
    }

    /// Whether transaction `txn` ended in a rollback
    pub fn was_rolled_back(&self, txn: u64) -> bool {
        self.rolled_back.binary_search(&txn).is_ok()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Cross-check free lists, translation pages and live records
    pub fn check_integrity(&mut self) -> Result<IntegrityReport> {
        self.ensure_usable()?;
        let result = self.integrity_report();
        self.track(result)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn transactions_enabled(&self) -> bool {
        self.transactions
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages in the file, including ones added by the open transaction
    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn compression(&self) -> Compression {
        self.header.compression
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(StoreError::Poisoned);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_usable()?;
        if self.readonly {
            return Err(StoreError::precondition("store is read-only"));
        }
        Ok(())
    }

    /// Poison the manager when `result` carries an unrecoverable error
    pub(crate) fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.poisons() && !self.poisoned {
                self.poisoned = true;
                tracing::error!(error = %e, path = %self.path.display(), "store poisoned");
            }
        }
        result
    }
}

/// Rebuild the free-space map by reading every data page from the file
fn scan_data_pages(file: &mut PagedFile, page_count: u64) -> Result<FreeSpaceMap> {
    let mut space = FreeSpaceMap::new();
    let mut buf = vec![0u8; file.page_size()];
    for page_no in 1..page_count {
        file.read_page(page_no, &mut buf)?;
        if crate::page::page_type(&buf).ok() == Some(PageType::UsedPhysical) {
            space.set(page_no, DataPage::load(&buf[..], page_no)?.insert_capacity());
        }
    }
    Ok(space)
}
