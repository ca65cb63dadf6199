//! HEADER page (page 0)
//!
//! ```text
//! ┌────────────────────────┬──────┬──────────────────────────────┐
//! │ Field                  │ Size │ Notes                        │
//! ├────────────────────────┼──────┼──────────────────────────────┤
//! │ magic "JDBF"           │ 4    │                              │
//! │ version                │ 2    │                              │
//! │ page size              │ 2    │                              │
//! │ free physical head     │ 8    │ page number, 0 = empty       │
//! │ free physical tail     │ 8    │                              │
//! │ free logical head      │ 8    │                              │
//! │ free logical tail      │ 8    │                              │
//! │ named roots recid      │ 8    │ 0 = none yet                 │
//! │ translation head       │ 8    │ first translation page       │
//! │ translation tail       │ 8    │ last translation page        │
//! │ next fresh recid       │ 8    │ first recid never handed out │
//! │ compression codec      │ 1    │                              │
//! └────────────────────────┴──────┴──────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::config::{Compression, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::error::{Result, StoreError};

/// Magic bytes identifying a pagekv main file
pub const MAGIC: &[u8; 4] = b"JDBF";

/// Current on-disk format version
pub const FORMAT_VERSION: u16 = 1;

/// Bytes of page 0 used by the header; the rest is reserved
pub const HEADER_LEN: usize = 73;

/// In-memory copy of the HEADER page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub page_size: usize,
    pub free_physical_head: u64,
    pub free_physical_tail: u64,
    pub free_logical_head: u64,
    pub free_logical_tail: u64,
    pub named_roots: u64,
    pub translation_head: u64,
    pub translation_tail: u64,
    pub next_recid: u64,
    pub compression: Compression,
}

impl Header {
    /// Header of a brand-new store
    pub fn new(page_size: usize, compression: Compression) -> Self {
        Self {
            page_size,
            free_physical_head: 0,
            free_physical_tail: 0,
            free_logical_head: 0,
            free_logical_tail: 0,
            named_roots: 0,
            translation_head: 0,
            translation_tail: 0,
            // recid 0 means "no record"
            next_recid: 1,
            compression,
        }
    }

    pub fn encode(&self, page: &mut [u8]) {
        let mut out = &mut page[..HEADER_LEN];
        out.put_slice(MAGIC);
        out.put_u16(FORMAT_VERSION);
        out.put_u16(self.page_size as u16);
        out.put_u64(self.free_physical_head);
        out.put_u64(self.free_physical_tail);
        out.put_u64(self.free_logical_head);
        out.put_u64(self.free_logical_tail);
        out.put_u64(self.named_roots);
        out.put_u64(self.translation_head);
        out.put_u64(self.translation_tail);
        out.put_u64(self.next_recid);
        out.put_u8(self.compression.to_byte());
    }

    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < HEADER_LEN {
            return Err(StoreError::corruption("header page too short"));
        }
        let page_size = check_prefix(&page[..8])?;
        if page_size != page.len() {
            return Err(StoreError::corruption(format!(
                "header records page size {} but pages are {} bytes",
                page_size,
                page.len()
            )));
        }

        let mut input = &page[8..HEADER_LEN];
        Ok(Self {
            page_size,
            free_physical_head: input.get_u64(),
            free_physical_tail: input.get_u64(),
            free_logical_head: input.get_u64(),
            free_logical_tail: input.get_u64(),
            named_roots: input.get_u64(),
            translation_head: input.get_u64(),
            translation_tail: input.get_u64(),
            next_recid: input.get_u64(),
            compression: Compression::from_byte(input.get_u8())?,
        })
    }

    /// Read the page size of an existing main file without knowing it in
    /// advance. `Ok(None)` when the file is too short to hold a header.
    pub fn peek_page_size(path: &Path) -> Result<Option<usize>> {
        let mut prefix = [0u8; 8];
        let mut file = File::open(path)?;
        match file.read_exact(&mut prefix) {
            Ok(()) => check_prefix(&prefix).map(Some),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Validate magic, version and page size; returns the page size
fn check_prefix(prefix: &[u8]) -> Result<usize> {
    let mut input = prefix;
    let mut magic = [0u8; 4];
    input.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err(StoreError::corruption(format!(
            "bad magic: expected JDBF, got {:?}",
            magic
        )));
    }

    let version = input.get_u16();
    if version != FORMAT_VERSION {
        return Err(StoreError::corruption(format!(
            "unsupported format version {}",
            version
        )));
    }

    let page_size = input.get_u16() as u32;
    // 32768 is the largest size and is stored as 0x8000
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(StoreError::corruption(format!(
            "invalid page size {} in header",
            page_size
        )));
    }
    Ok(page_size as usize)
}
