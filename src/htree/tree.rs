//! H*Tree algorithms over serialized keys and values
//!
//! The tree is addressed by hash bytes: a directory at depth `d` picks its
//! slot with byte `d` of the 32-bit key hash (most significant first), and
//! a bucket hanging off it has depth `d + 1`. A bucket that grows past
//! `MAX_BUCKET` entries is replaced by a directory one level down, until
//! the four hash bytes are used up; buckets at depth 4 grow without bound.
//! Directories are never merged back, even when they become empty.

use std::collections::HashSet;

use crate::error::{Result, StoreError};
use crate::recman::RecordManager;

use super::node::{Bucket, Child, Directory, Node, BRANCHING};

/// Entries a bucket holds before it splits
pub const MAX_BUCKET: usize = 8;

/// Number of hash bytes, and the depth of the deepest buckets
pub const MAX_DEPTH: u8 = 4;

/// Hash of a serialized key
pub fn hash_key(key: &[u8]) -> u32 {
    crc32fast::hash(key)
}

/// Byte `depth` of a hash, most significant first
pub fn hash_byte(hash: u32, depth: u8) -> u8 {
    (hash >> (24 - 8 * depth as u32)) as u8
}

/// Shape of a tree as found by `RawTree::verify`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub directories: u64,
    pub buckets: u64,
    pub entries: u64,
    /// Deepest bucket depth seen
    pub max_depth: u8,
    /// Largest bucket seen
    pub max_bucket_len: usize,
}

/// A tree rooted at a directory record
#[derive(Debug, Clone, Copy)]
pub struct RawTree {
    root: u64,
    hasher: fn(&[u8]) -> u32,
}

impl RawTree {
    pub fn new(root: u64) -> Self {
        Self::with_hasher(root, hash_key)
    }

    pub fn with_hasher(root: u64, hasher: fn(&[u8]) -> u32) -> Self {
        Self { root, hasher }
    }

    /// Store an empty root directory and return its recid
    pub fn create(recman: &mut RecordManager) -> Result<u64> {
        recman.insert_bytes(&Node::Directory(Directory::new(0)).encode())
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn get(&self, recman: &mut RecordManager, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = (self.hasher)(key);
        let mut dir = load_directory(recman, self.root)?;
        loop {
            let child = dir.slots[hash_byte(hash, dir.depth) as usize];
            match child {
                Child::Empty => return Ok(None),
                Child::Directory(recid) => dir = load_directory(recman, recid)?,
                Child::Bucket(recid) => {
                    let bucket = load_bucket(recman, recid)?;
                    return Ok(bucket
                        .position(key)
                        .map(|pos| bucket.entries[pos].1.clone()));
                }
            }
        }
    }

    /// Insert or replace; returns the previous value
    pub fn put(
        &self,
        recman: &mut RecordManager,
        key: &[u8],
        value: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let hash = (self.hasher)(key);
        let mut dir_recid = self.root;
        let mut dir = load_directory(recman, dir_recid)?;
        loop {
            let slot = hash_byte(hash, dir.depth) as usize;
            let child = dir.slots[slot];
            match child {
                Child::Empty => {
                    let bucket = Bucket {
                        depth: dir.depth + 1,
                        entries: vec![(key.to_vec(), value.to_vec())],
                    };
                    let recid = recman.insert_bytes(&Node::Bucket(bucket).encode())?;
                    dir.slots[slot] = Child::Bucket(recid);
                    store_directory(recman, dir_recid, dir)?;
                    return Ok(None);
                }
                Child::Directory(recid) => {
                    dir_recid = recid;
                    dir = load_directory(recman, recid)?;
                }
                Child::Bucket(recid) => {
                    let mut bucket = load_bucket(recman, recid)?;
                    if let Some(pos) = bucket.position(key) {
                        let old = std::mem::replace(&mut bucket.entries[pos].1, value.to_vec());
                        recman.update_bytes(recid, &Node::Bucket(bucket).encode())?;
                        return Ok(Some(old));
                    }

                    bucket.entries.push((key.to_vec(), value.to_vec()));
                    if bucket.entries.len() > MAX_BUCKET && bucket.depth < MAX_DEPTH {
                        let child = self.split(recman, bucket.entries, bucket.depth)?;
                        recman.delete(recid)?;
                        dir.slots[slot] = Child::Directory(child);
                        store_directory(recman, dir_recid, dir)?;
                    } else {
                        recman.update_bytes(recid, &Node::Bucket(bucket).encode())?;
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Build a directory at `depth` holding `entries`, splitting any slot
    /// that still overflows. Returns the new directory's recid.
    fn split(
        &self,
        recman: &mut RecordManager,
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        depth: u8,
    ) -> Result<u64> {
        let mut groups: Vec<Vec<(Vec<u8>, Vec<u8>)>> = vec![Vec::new(); BRANCHING];
        for (key, value) in entries {
            let slot = hash_byte((self.hasher)(&key), depth) as usize;
            groups[slot].push((key, value));
        }

        let mut dir = Directory::new(depth);
        for (slot, group) in groups.into_iter().enumerate() {
            if group.is_empty() {
                continue;
            }
            dir.slots[slot] = if group.len() > MAX_BUCKET && depth + 1 < MAX_DEPTH {
                Child::Directory(self.split(recman, group, depth + 1)?)
            } else {
                let bucket = Bucket {
                    depth: depth + 1,
                    entries: group,
                };
                Child::Bucket(recman.insert_bytes(&Node::Bucket(bucket).encode())?)
            };
        }
        tracing::trace!(depth, "split bucket into directory");
        recman.insert_bytes(&Node::Directory(dir).encode())
    }

    /// Remove a key; returns its value
    pub fn remove(&self, recman: &mut RecordManager, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = (self.hasher)(key);
        let mut dir_recid = self.root;
        let mut dir = load_directory(recman, dir_recid)?;
        loop {
            let slot = hash_byte(hash, dir.depth) as usize;
            let child = dir.slots[slot];
            match child {
                Child::Empty => return Ok(None),
                Child::Directory(recid) => {
                    dir_recid = recid;
                    dir = load_directory(recman, recid)?;
                }
                Child::Bucket(recid) => {
                    let mut bucket = load_bucket(recman, recid)?;
                    let Some(pos) = bucket.position(key) else {
                        return Ok(None);
                    };
                    let (_, old) = bucket.entries.swap_remove(pos);
                    if bucket.entries.is_empty() {
                        recman.delete(recid)?;
                        dir.slots[slot] = Child::Empty;
                        store_directory(recman, dir_recid, dir)?;
                    } else {
                        recman.update_bytes(recid, &Node::Bucket(bucket).encode())?;
                    }
                    return Ok(Some(old));
                }
            }
        }
    }

    /// Delete every node below the root and leave the root empty
    pub fn clear(&self, recman: &mut RecordManager) -> Result<()> {
        let root = load_directory(recman, self.root)?;
        let mut pending: Vec<Child> = root.children().map(|(_, child)| child).collect();
        while let Some(child) = pending.pop() {
            match child {
                Child::Directory(recid) => {
                    let dir = load_directory(recman, recid)?;
                    pending.extend(dir.children().map(|(_, child)| child));
                    recman.delete(recid)?;
                }
                Child::Bucket(recid) => recman.delete(recid)?,
                Child::Empty => {}
            }
        }
        store_directory(recman, self.root, Directory::new(0))
    }

    /// Number of entries, by traversal
    pub fn len(&self, recman: &mut RecordManager) -> Result<u64> {
        let mut count = 0;
        let mut pending = vec![Child::Directory(self.root)];
        while let Some(child) = pending.pop() {
            match child {
                Child::Directory(recid) => {
                    let dir = load_directory(recman, recid)?;
                    pending.extend(dir.children().map(|(_, child)| child));
                }
                Child::Bucket(recid) => count += load_bucket(recman, recid)?.entries.len() as u64,
                Child::Empty => {}
            }
        }
        Ok(count)
    }

    /// Walk the whole tree and check its structure: directory and bucket
    /// depths, hash prefixes along every path, bucket bounds, duplicate keys.
    pub fn verify(&self, recman: &mut RecordManager) -> Result<TreeStats> {
        let mut stats = TreeStats::default();
        let mut seen_records = HashSet::new();
        // (recid, expected depth, hash prefix bytes walked so far)
        let mut pending: Vec<(u64, u8, Vec<u8>)> = vec![(self.root, 0, Vec::new())];

        while let Some((recid, depth, path)) = pending.pop() {
            if !seen_records.insert(recid) {
                return Err(StoreError::corruption(format!(
                    "htree node {} is reachable twice",
                    recid
                )));
            }
            let dir = load_directory(recman, recid)?;
            if dir.depth != depth {
                return Err(StoreError::corruption(format!(
                    "directory {} has depth {}, expected {}",
                    recid, dir.depth, depth
                )));
            }
            stats.directories += 1;

            for (slot, child) in dir.children() {
                let mut child_path = path.clone();
                child_path.push(slot);
                match child {
                    Child::Directory(child_recid) => {
                        if depth + 1 >= MAX_DEPTH {
                            return Err(StoreError::corruption(format!(
                                "directory {} below the last hash byte",
                                child_recid
                            )));
                        }
                        pending.push((child_recid, depth + 1, child_path));
                    }
                    Child::Bucket(bucket_recid) => {
                        if !seen_records.insert(bucket_recid) {
                            return Err(StoreError::corruption(format!(
                                "bucket {} is reachable twice",
                                bucket_recid
                            )));
                        }
                        let bucket = load_bucket(recman, bucket_recid)?;
                        self.verify_bucket(bucket_recid, &bucket, &child_path)?;
                        stats.buckets += 1;
                        stats.entries += bucket.entries.len() as u64;
                        stats.max_depth = stats.max_depth.max(bucket.depth);
                        stats.max_bucket_len = stats.max_bucket_len.max(bucket.entries.len());
                    }
                    Child::Empty => {}
                }
            }
        }
        Ok(stats)
    }

    fn verify_bucket(&self, recid: u64, bucket: &Bucket, path: &[u8]) -> Result<()> {
        if bucket.depth as usize != path.len() {
            return Err(StoreError::corruption(format!(
                "bucket {} has depth {} at path length {}",
                recid,
                bucket.depth,
                path.len()
            )));
        }
        if bucket.entries.is_empty() {
            return Err(StoreError::corruption(format!("bucket {} is empty", recid)));
        }
        if bucket.entries.len() > MAX_BUCKET && bucket.depth < MAX_DEPTH {
            return Err(StoreError::corruption(format!(
                "bucket {} holds {} entries at depth {}",
                recid,
                bucket.entries.len(),
                bucket.depth
            )));
        }

        let mut keys = HashSet::new();
        for (key, _) in &bucket.entries {
            if !keys.insert(key.as_slice()) {
                return Err(StoreError::corruption(format!(
                    "bucket {} holds a key twice",
                    recid
                )));
            }
            let hash = (self.hasher)(key);
            for (depth, expected) in path.iter().enumerate() {
                if hash_byte(hash, depth as u8) != *expected {
                    return Err(StoreError::corruption(format!(
                        "bucket {} holds a key whose hash byte {} does not match its path",
                        recid, depth
                    )));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Node access
// =============================================================================

/// Load any node; `None` when the recid no longer holds a record
pub fn load_node(recman: &mut RecordManager, recid: u64) -> Result<Option<Node>> {
    match recman.fetch_bytes(recid)? {
        Some(bytes) => Node::decode(&bytes).map(Some),
        None => Ok(None),
    }
}

pub fn load_directory(recman: &mut RecordManager, recid: u64) -> Result<Directory> {
    match load_node(recman, recid)? {
        Some(Node::Directory(dir)) if dir.depth < MAX_DEPTH => Ok(dir),
        Some(Node::Directory(dir)) => Err(StoreError::corruption(format!(
            "directory {} has impossible depth {}",
            recid, dir.depth
        ))),
        Some(Node::Bucket(_)) => Err(StoreError::corruption(format!(
            "htree record {} is a bucket, expected a directory",
            recid
        ))),
        None => Err(dangling(recid)),
    }
}

pub fn load_bucket(recman: &mut RecordManager, recid: u64) -> Result<Bucket> {
    match load_node(recman, recid)? {
        Some(Node::Bucket(bucket)) => Ok(bucket),
        Some(Node::Directory(_)) => Err(StoreError::corruption(format!(
            "htree record {} is a directory, expected a bucket",
            recid
        ))),
        None => Err(dangling(recid)),
    }
}

fn store_directory(recman: &mut RecordManager, recid: u64, dir: Directory) -> Result<()> {
    recman.update_bytes(recid, &Node::Directory(dir).encode())
}

fn dangling(recid: u64) -> StoreError {
    StoreError::corruption(format!("dangling htree recid {}", recid))
}
