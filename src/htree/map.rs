//! Typed H*Tree map handle

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::serializer::{from_bytes, to_bytes, BincodeSerializer, Serializer};
use crate::store::{State, Store};

use super::iter::{Entries, Keys};
use super::listener::{Listeners, RecordListener};
use super::node::Child;
use super::tree::{load_directory, RawTree, TreeStats};

/// Record reached through a map's named root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MapHeader {
    pub root: u64,
    pub key_codec: String,
    pub value_codec: String,
}

/// What a root directory slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Empty,
    Directory,
    Bucket,
}

/// A persistent hash map stored in a `Store`.
///
/// The handle holds recids only; every operation locks the store for its
/// duration. Keys are compared by their serialized bytes. Handles remain
/// valid across commit and rollback, except for a map created inside a
/// transaction that was rolled back.
pub struct HTreeMap<K, V> {
    store: Store,
    name: String,
    header_recid: u64,
    tree: RawTree,
    created_txn: Option<u64>,
    keys: Arc<dyn Serializer<K>>,
    values: Arc<dyn Serializer<V>>,
    listeners: Arc<Listeners<K, V>>,
}

impl<K, V> Clone for HTreeMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            header_recid: self.header_recid,
            tree: self.tree,
            created_txn: self.created_txn,
            keys: Arc::clone(&self.keys),
            values: Arc::clone(&self.values),
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<K, V> fmt::Debug for HTreeMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HTreeMap")
            .field("name", &self.name)
            .field("header", &self.header_recid)
            .field("root", &self.tree.root())
            .finish()
    }
}

impl<K, V> HTreeMap<K, V> {
    /// Create the map's root directory and header and bind them to `name`
    pub(crate) fn create(
        store: Store,
        state: &mut State,
        name: &str,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Result<Self>
    where
        K: 'static,
        V: 'static,
    {
        let recman = &mut state.recman;
        if recman.named_root(name)?.is_some() {
            return Err(StoreError::precondition(format!(
                "named root {:?} already exists",
                name
            )));
        }

        let root = RawTree::create(recman)?;
        let header = MapHeader {
            root,
            key_codec: keys.codec_name().to_string(),
            value_codec: values.codec_name().to_string(),
        };
        let header_recid = recman.insert(&header, &BincodeSerializer::<MapHeader>::new())?;
        recman.set_named_root(name, header_recid)?;

        let created_txn = recman.txn_id();
        state.fresh_maps.insert(header_recid, created_txn);
        tracing::debug!(name, root, header = header_recid, "created hash map");

        let listeners = shared_listeners(state, header_recid);
        Ok(Self {
            store,
            name: name.to_string(),
            header_recid,
            tree: RawTree::new(root),
            created_txn: Some(created_txn),
            keys,
            values,
            listeners,
        })
    }

    /// Attach to an existing map, checking the codecs it was created with
    pub(crate) fn open(
        store: Store,
        state: &mut State,
        name: &str,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Result<Self>
    where
        K: 'static,
        V: 'static,
    {
        let recman = &mut state.recman;
        let header_recid = recman
            .named_root(name)?
            .ok_or_else(|| StoreError::precondition(format!("no map named {:?}", name)))?;
        let header: MapHeader = recman
            .fetch(header_recid, &BincodeSerializer::<MapHeader>::new())?
            .ok_or_else(|| {
                StoreError::corruption(format!("header record of map {:?} is missing", name))
            })?;

        for (side, stored, given) in [
            ("key", &header.key_codec, keys.codec_name()),
            ("value", &header.value_codec, values.codec_name()),
        ] {
            if stored != given {
                return Err(StoreError::precondition(format!(
                    "map {:?} stores {}s with codec {:?}, not {:?}",
                    name, side, stored, given
                )));
            }
        }

        let created_txn = state.fresh_maps.get(&header_recid).copied();
        let listeners = shared_listeners(state, header_recid);
        Ok(Self {
            store,
            name: name.to_string(),
            header_recid,
            tree: RawTree::new(header.root),
            created_txn,
            keys,
            values,
            listeners,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Recid of the root directory
    pub fn root_recid(&self) -> u64 {
        self.tree.root()
    }

    /// Run `f` on the raw tree under the store lock
    fn with_tree<R>(&self, f: impl FnOnce(&RawTree, &mut State) -> Result<R>) -> Result<R> {
        let tree = self.tree;
        let created_txn = self.created_txn;
        self.store.with_state(|state| {
            state.check_map_valid(created_txn)?;
            f(&tree, state)
        })
    }

    // =========================================================================
    // Map operations
    // =========================================================================

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let key = to_bytes(self.keys.as_ref(), key)?;
        let found = self.with_tree(|tree, state| tree.get(&mut state.recman, &key))?;
        found
            .map(|bytes| from_bytes(self.values.as_ref(), &bytes))
            .transpose()
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        let key = to_bytes(self.keys.as_ref(), key)?;
        let found = self.with_tree(|tree, state| tree.get(&mut state.recman, &key))?;
        Ok(found.is_some())
    }

    /// Insert or replace; returns the previous value
    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        let key_bytes = to_bytes(self.keys.as_ref(), key)?;
        let value_bytes = to_bytes(self.values.as_ref(), value)?;
        let old = self.with_tree(|tree, state| tree.put(&mut state.recman, &key_bytes, &value_bytes))?;

        let old = old
            .map(|bytes| from_bytes(self.values.as_ref(), &bytes))
            .transpose()?;
        self.listeners.notify_put(key, old.as_ref(), value)?;
        Ok(old)
    }

    /// Remove a key; returns its value
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let key_bytes = to_bytes(self.keys.as_ref(), key)?;
        let old = self.with_tree(|tree, state| tree.remove(&mut state.recman, &key_bytes))?;

        let old = old
            .map(|bytes| from_bytes(self.values.as_ref(), &bytes))
            .transpose()?;
        if let Some(value) = &old {
            self.listeners.notify_removed(key, value)?;
        }
        Ok(old)
    }

    /// Drop every entry. The root directory keeps its recid; listeners are
    /// not notified.
    pub fn clear(&self) -> Result<()> {
        self.with_tree(|tree, state| tree.clear(&mut state.recman))
    }

    /// Number of entries, counted by walking the tree
    pub fn len(&self) -> Result<usize> {
        self.with_tree(|tree, state| tree.len(&mut state.recman))
            .map(|len| len as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let empty = self.with_tree(|tree, state| {
            let root = load_directory(&mut state.recman, tree.root())?;
            let empty = root.children().next().is_none();
            Ok(empty)
        })?;
        // removal leaves empty sub-directories behind
        if empty {
            return Ok(true);
        }
        Ok(self.len()? == 0)
    }

    /// Iterate over the keys. See `entries` for the consistency caveat.
    pub fn keys(&self) -> Keys<K> {
        Keys::new(
            self.store.clone(),
            self.tree.root(),
            self.created_txn,
            Arc::clone(&self.keys),
        )
    }

    /// Iterate over all pairs. The store is locked once per bucket, not for
    /// the whole walk; mutating the map meanwhile may make the iterator skip
    /// or repeat entries.
    pub fn entries(&self) -> Entries<K, V> {
        Entries::new(
            self.store.clone(),
            self.tree.root(),
            self.created_txn,
            Arc::clone(&self.keys),
            Arc::clone(&self.values),
        )
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener for every handle of this map
    pub fn add_listener(&self, listener: Arc<dyn RecordListener<K, V>>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener; false when it was not registered
    pub fn remove_listener(&self, listener: &Arc<dyn RecordListener<K, V>>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Check the tree's structure and return its shape
    pub fn verify(&self) -> Result<TreeStats> {
        self.with_tree(|tree, state| tree.verify(&mut state.recman))
    }

    /// Kind of node in root slot `slot`
    pub fn root_slot(&self, slot: u8) -> Result<SlotKind> {
        self.with_tree(|tree, state| {
            let root = load_directory(&mut state.recman, tree.root())?;
            Ok(match root.slots[slot as usize] {
                Child::Empty => SlotKind::Empty,
                Child::Directory(_) => SlotKind::Directory,
                Child::Bucket(_) => SlotKind::Bucket,
            })
        })
    }
}

/// The listener list every handle of the map at `header_recid` shares.
/// A handle typed differently from the first one gets a list of its own.
fn shared_listeners<K: 'static, V: 'static>(
    state: &mut State,
    header_recid: u64,
) -> Arc<Listeners<K, V>> {
    if let Some(existing) = state.listeners.get(&header_recid) {
        if let Ok(listeners) = Arc::clone(existing).downcast::<Listeners<K, V>>() {
            return listeners;
        }
        return Arc::new(Listeners::new());
    }
    let listeners = Arc::new(Listeners::<K, V>::new());
    let erased: Arc<dyn Any + Send + Sync> = listeners.clone();
    state.listeners.insert(header_recid, erased);
    listeners
}
