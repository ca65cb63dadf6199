//! Map iterators
//!
//! Depth-first walk over directory slots in slot order, one bucket at a
//! time. The store lock is taken for each step and released in between, so
//! other handles may mutate the map while an iterator is alive. Such a walk
//! has no consistency guarantee: entries may be skipped or repeated, and
//! nodes that vanished in the meantime are passed over.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::recman::RecordManager;
use crate::serializer::{from_bytes, Serializer};
use crate::store::Store;

use super::node::{Child, Node};
use super::tree::load_node;

struct Frame {
    children: Vec<Child>,
    next: usize,
}

/// Traversal state, independent of the store handle
struct Walk {
    root: u64,
    started: bool,
    done: bool,
    stack: Vec<Frame>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Walk {
    fn push_directory(&mut self, node: Option<Node>) -> bool {
        match node {
            Some(Node::Directory(dir)) => {
                self.stack.push(Frame {
                    children: dir.children().map(|(_, child)| child).collect(),
                    next: 0,
                });
                true
            }
            _ => false,
        }
    }

    /// Buffer the next non-empty bucket, or mark the walk done
    fn advance(&mut self, recman: &mut RecordManager) -> Result<()> {
        if !self.started {
            self.started = true;
            let root = load_node(recman, self.root)?;
            if !self.push_directory(root) {
                return Err(StoreError::corruption(format!(
                    "map root {} is not a directory",
                    self.root
                )));
            }
        }

        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return Ok(());
            };
            let Some(&child) = frame.children.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;

            match child {
                Child::Directory(recid) => {
                    let node = load_node(recman, recid)?;
                    self.push_directory(node);
                }
                Child::Bucket(recid) => {
                    if let Some(Node::Bucket(bucket)) = load_node(recman, recid)? {
                        self.buffer.extend(bucket.entries);
                        if !self.buffer.is_empty() {
                            return Ok(());
                        }
                    }
                }
                Child::Empty => {}
            }
        }
    }
}

/// Serialized entries, one bucket fetched per lock acquisition
struct RawEntries {
    store: Store,
    created_txn: Option<u64>,
    walk: Walk,
}

impl RawEntries {
    fn new(store: Store, root: u64, created_txn: Option<u64>) -> Self {
        Self {
            store,
            created_txn,
            walk: Walk {
                root,
                started: false,
                done: false,
                stack: Vec::new(),
                buffer: VecDeque::new(),
            },
        }
    }

    fn next_raw(&mut self) -> Option<Result<(Vec<u8>, Vec<u8>)>> {
        loop {
            if let Some(entry) = self.walk.buffer.pop_front() {
                return Some(Ok(entry));
            }
            if self.walk.done {
                return None;
            }

            let Self {
                store,
                created_txn,
                walk,
            } = self;
            let step = store.with_state(|state| {
                state.check_map_valid(*created_txn)?;
                walk.advance(&mut state.recman)
            });
            if let Err(e) = step {
                self.walk.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// Iterator over `(key, value)` pairs of an `HTreeMap`
pub struct Entries<K, V> {
    raw: RawEntries,
    keys: Arc<dyn Serializer<K>>,
    values: Arc<dyn Serializer<V>>,
}

impl<K, V> Entries<K, V> {
    pub(crate) fn new(
        store: Store,
        root: u64,
        created_txn: Option<u64>,
        keys: Arc<dyn Serializer<K>>,
        values: Arc<dyn Serializer<V>>,
    ) -> Self {
        Self {
            raw: RawEntries::new(store, root, created_txn),
            keys,
            values,
        }
    }
}

impl<K, V> Iterator for Entries<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.raw.next_raw()?;
        Some(entry.and_then(|(key, value)| {
            Ok((
                from_bytes(self.keys.as_ref(), &key)?,
                from_bytes(self.values.as_ref(), &value)?,
            ))
        }))
    }
}

/// Iterator over the keys of an `HTreeMap`
pub struct Keys<K> {
    raw: RawEntries,
    keys: Arc<dyn Serializer<K>>,
}

impl<K> Keys<K> {
    pub(crate) fn new(
        store: Store,
        root: u64,
        created_txn: Option<u64>,
        keys: Arc<dyn Serializer<K>>,
    ) -> Self {
        Self {
            raw: RawEntries::new(store, root, created_txn),
            keys,
        }
    }
}

impl<K> Iterator for Keys<K> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.raw.next_raw()?;
        Some(entry.and_then(|(key, _)| from_bytes(self.keys.as_ref(), &key)))
    }
}
