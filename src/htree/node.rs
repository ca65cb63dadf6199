//! H*Tree node records
//!
//! ```text
//! Directory: 'D' │ depth (1) │ packed n │ n × (slot u8, kind u8, packed recid)
//! Bucket:    'B' │ depth (1) │ packed n │ n × (packed klen, key, packed vlen, value)
//! ```
//! Only non-empty directory slots are written. Kind 1 is a child
//! directory, kind 2 a bucket.

use bytes::Buf;

use crate::error::{Result, StoreError};
use crate::serializer::{pack_u64, unpack_u64};

/// Slots per directory, one per hash byte value
pub const BRANCHING: usize = 256;

const DIRECTORY_TAG: u8 = b'D';
const BUCKET_TAG: u8 = b'B';
const KIND_DIRECTORY: u8 = 1;
const KIND_BUCKET: u8 = 2;

/// Content of one directory slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Child {
    Empty,
    Directory(u64),
    Bucket(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub depth: u8,
    pub slots: Vec<Child>,
}

impl Directory {
    pub fn new(depth: u8) -> Self {
        Self {
            depth,
            slots: vec![Child::Empty; BRANCHING],
        }
    }

    /// Non-empty slots in slot order
    pub fn children(&self) -> impl Iterator<Item = (u8, Child)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, child)| **child != Child::Empty)
            .map(|(slot, child)| (slot as u8, *child))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub depth: u8,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Bucket {
    pub fn position(&self, key: &[u8]) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(Directory),
    Bucket(Bucket),
}

impl Node {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Node::Directory(dir) => {
                out.push(DIRECTORY_TAG);
                out.push(dir.depth);
                pack_u64(&mut out, dir.children().count() as u64);
                for (slot, child) in dir.children() {
                    out.push(slot);
                    match child {
                        Child::Directory(recid) => {
                            out.push(KIND_DIRECTORY);
                            pack_u64(&mut out, recid);
                        }
                        Child::Bucket(recid) => {
                            out.push(KIND_BUCKET);
                            pack_u64(&mut out, recid);
                        }
                        Child::Empty => {}
                    }
                }
            }
            Node::Bucket(bucket) => {
                out.push(BUCKET_TAG);
                out.push(bucket.depth);
                pack_u64(&mut out, bucket.entries.len() as u64);
                for (key, value) in &bucket.entries {
                    pack_u64(&mut out, key.len() as u64);
                    out.extend_from_slice(key);
                    pack_u64(&mut out, value.len() as u64);
                    out.extend_from_slice(value);
                }
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        if input.remaining() < 2 {
            return Err(StoreError::corruption("htree node shorter than its header"));
        }
        let tag = input.get_u8();
        let depth = input.get_u8();
        let count = unpack_u64(&mut input)? as usize;

        match tag {
            DIRECTORY_TAG => {
                let mut dir = Directory::new(depth);
                for _ in 0..count {
                    if input.remaining() < 2 {
                        return Err(StoreError::corruption("truncated directory slot"));
                    }
                    let slot = input.get_u8() as usize;
                    let kind = input.get_u8();
                    let recid = unpack_u64(&mut input)?;
                    dir.slots[slot] = match kind {
                        KIND_DIRECTORY => Child::Directory(recid),
                        KIND_BUCKET => Child::Bucket(recid),
                        other => {
                            return Err(StoreError::corruption(format!(
                                "unknown directory slot kind {}",
                                other
                            )))
                        }
                    };
                }
                Ok(Node::Directory(dir))
            }
            BUCKET_TAG => {
                let mut entries = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let key = read_blob(&mut input)?;
                    let value = read_blob(&mut input)?;
                    entries.push((key, value));
                }
                Ok(Node::Bucket(Bucket { depth, entries }))
            }
            other => Err(StoreError::corruption(format!(
                "unknown htree node tag {:#04x}",
                other
            ))),
        }
    }
}

fn read_blob(input: &mut &[u8]) -> Result<Vec<u8>> {
    let len = unpack_u64(input)? as usize;
    if input.remaining() < len {
        return Err(StoreError::corruption("truncated bucket entry"));
    }
    let blob = input[..len].to_vec();
    input.advance(len);
    Ok(blob)
}
