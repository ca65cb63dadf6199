//! Store Module
//!
//! The handle applications hold: it owns the record manager behind one
//! lock and hands out maps.
//!
//! ## Responsibilities
//! - Open, recover and close the store files
//! - Serialize every operation through a single store-wide lock
//! - Create and reopen H*Tree maps by name
//! - Commit and roll back transactions
//! - Raw record access for callers that manage their own recids

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Options;
use crate::error::{Result, StoreError};
use crate::htree::HTreeMap;
use crate::recman::{IntegrityReport, RecordManager};
use crate::serializer::Serializer;

/// Everything guarded by the store lock
pub(crate) struct State {
    pub recman: RecordManager,
    /// Maps created since the last commit: header recid -> transaction
    pub fresh_maps: HashMap<u64, u64>,
    /// Listener lists shared by every handle of a map, by header recid.
    /// Each value is an `Arc<Listeners<K, V>>`.
    pub listeners: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl State {
    /// Fail for handles of a map whose creating transaction was rolled back
    pub fn check_map_valid(&self, created_txn: Option<u64>) -> Result<()> {
        match created_txn {
            Some(txn) if self.recman.was_rolled_back(txn) => Err(StoreError::precondition(
                "map was created in a rolled-back transaction; reopen it",
            )),
            _ => Ok(()),
        }
    }
}

struct Shared {
    path: PathBuf,
    /// `None` once closed
    state: Mutex<Option<State>>,
}

/// An open store. Cloning yields another handle to the same store.
///
/// ## Concurrency Model
///
/// One lock guards the record manager and every index. Each call takes it
/// for its whole duration; iterators take it once per step. Dropping the
/// last handle without `close` abandons the open transaction, exactly as a
/// crash would.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open or create the store at `path`
    ///
    /// On startup:
    /// 1. Validate options
    /// 2. Replay a committed transaction left in the log, discard any other
    /// 3. Load the HEADER page and translation chain
    /// 4. Rebuild the free-space map from the data pages
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let recman = RecordManager::open(&path, &options)?;
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                state: Mutex::new(Some(State {
                    recman,
                    fresh_maps: HashMap::new(),
                    listeners: HashMap::new(),
                })),
            }),
        })
    }

    /// Run `f` under the store lock. Errors that leave the files in an
    /// unknown state poison the store.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> Result<R>) -> Result<R> {
        let mut guard = self.shared.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| StoreError::precondition("store is closed"))?;
        let result = f(state);
        state.recman.track(result)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    // =========================================================================
    // Maps
    // =========================================================================

    /// Create an empty hash map bound to `name`
    pub fn create_hash_map<K, V, KS, VS>(&self, name: &str, keys: KS, values: VS) -> Result<HTreeMap<K, V>>
    where
        K: 'static,
        V: 'static,
        KS: Serializer<K> + 'static,
        VS: Serializer<V> + 'static,
    {
        self.with_state(|state| {
            HTreeMap::create(self.clone(), state, name, Arc::new(keys), Arc::new(values))
        })
    }

    /// Reopen the hash map bound to `name`. The codecs must carry the names
    /// the map was created with.
    pub fn open_map<K, V, KS, VS>(&self, name: &str, keys: KS, values: VS) -> Result<HTreeMap<K, V>>
    where
        K: 'static,
        V: 'static,
        KS: Serializer<K> + 'static,
        VS: Serializer<V> + 'static,
    {
        self.with_state(|state| {
            HTreeMap::open(self.clone(), state, name, Arc::new(keys), Arc::new(values))
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn commit(&self) -> Result<()> {
        self.with_state(|state| {
            state.recman.commit()?;
            state.fresh_maps.clear();
            Ok(())
        })
    }

    /// Discard everything since the last commit. Handles of maps created in
    /// the discarded transaction stop working.
    pub fn rollback(&self) -> Result<()> {
        let mut guard = self.shared.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| StoreError::precondition("store is closed"))?;
        state.recman.rollback()?;
        for header_recid in state.fresh_maps.keys() {
            state.listeners.remove(header_recid);
        }
        state.fresh_maps.clear();
        Ok(())
    }

    /// Commit pending work and release the files. Closing twice is fine;
    /// anything else after `close` fails with a precondition error.
    pub fn close(&self) -> Result<()> {
        let state = self.shared.state.lock().take();
        match state {
            Some(state) => state.recman.close(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().is_none()
    }

    pub fn is_poisoned(&self) -> bool {
        self.shared
            .state
            .lock()
            .as_ref()
            .map(|state| state.recman.is_poisoned())
            .unwrap_or(false)
    }

    // =========================================================================
    // Raw records
    // =========================================================================

    pub fn insert<T>(&self, value: &T, serializer: &dyn Serializer<T>) -> Result<u64> {
        self.with_state(|state| state.recman.insert(value, serializer))
    }

    /// `None` when the record was deleted
    pub fn fetch<T>(&self, recid: u64, serializer: &dyn Serializer<T>) -> Result<Option<T>> {
        self.with_state(|state| state.recman.fetch(recid, serializer))
    }

    pub fn update<T>(&self, recid: u64, value: &T, serializer: &dyn Serializer<T>) -> Result<()> {
        self.with_state(|state| state.recman.update(recid, value, serializer))
    }

    pub fn delete(&self, recid: u64) -> Result<()> {
        self.with_state(|state| state.recman.delete(recid))
    }

    pub fn named_root(&self, name: &str) -> Result<Option<u64>> {
        self.with_state(|state| state.recman.named_root(name))
    }

    /// Bind `name` to `recid`; 0 removes the binding
    pub fn set_named_root(&self, name: &str, recid: u64) -> Result<()> {
        self.with_state(|state| state.recman.set_named_root(name, recid))
    }

    pub fn named_roots(&self) -> Result<Vec<(String, u64)>> {
        self.with_state(|state| state.recman.named_roots())
    }

    /// Cross-check free lists and live records
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        self.with_state(|state| state.recman.check_integrity())
    }
}
