//! Page Module
//!
//! Fixed-size pages of the main file and the bounded cache in front of them.
//!
//! ## Responsibilities
//! - Read and write whole pages at `page_no * page_size`
//! - Keep recently used pages in memory, never evicting dirty ones
//! - Hand dirty page images to the transaction log on commit
//!
//! ## Page Header (every page except page 0)
//! ```text
//! ┌──────────┬──────────┬────────────────┬───────────┬───────────┐
//! │ Type (1) │ Rsvd (1) │ FirstFree (2)  │ Prev (8)  │ Next (8)  │
//! └──────────┴──────────┴────────────────┴───────────┴───────────┘
//! ```
//! All integers are big-endian. Page 0 holds the store HEADER instead.

mod cache;
mod file;

pub use cache::PageCache;
pub use file::PagedFile;

use crate::error::{Result, StoreError};

/// Size of the generic page header
pub const PAGE_HEADER_SIZE: usize = 20;

/// Highest page number a Location can address (48 bits)
pub const MAX_PAGES: u64 = 1 << 48;

const TYPE_OFFSET: usize = 0;
const FIRST_FREE_OFFSET: usize = 2;
const PREV_OFFSET: usize = 4;
const NEXT_OFFSET: usize = 12;

/// Page type tags stored in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Unused page, linked into the physical free list
    FreePhysical = 1,
    /// Slotted data page holding records
    UsedPhysical = 2,
    /// Page holding a stack of released recids
    FreeLogical = 3,
    /// Page mapping recid slots to Locations
    Translation = 4,
    /// Continuation page of an oversized record
    Overflow = 5,
}

impl PageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(PageType::FreePhysical),
            2 => Some(PageType::UsedPhysical),
            3 => Some(PageType::FreeLogical),
            4 => Some(PageType::Translation),
            5 => Some(PageType::Overflow),
            _ => None,
        }
    }
}

// =============================================================================
// Big-endian field helpers
// =============================================================================

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

// =============================================================================
// Generic header accessors
// =============================================================================

/// Type tag of a page, or a corruption error for unknown tags
pub fn page_type(buf: &[u8]) -> Result<PageType> {
    PageType::from_byte(buf[TYPE_OFFSET]).ok_or_else(|| {
        StoreError::corruption(format!("unknown page type tag {}", buf[TYPE_OFFSET]))
    })
}

/// Like `page_type`, but also fails when the tag differs from `expected`
pub fn expect_type(buf: &[u8], page_no: u64, expected: PageType) -> Result<()> {
    let actual = page_type(buf)?;
    if actual != expected {
        return Err(StoreError::corruption(format!(
            "page {} is {:?}, expected {:?}",
            page_no, actual, expected
        )));
    }
    Ok(())
}

/// Zero the page and stamp a fresh header of the given type
pub fn init_page(buf: &mut [u8], page_type: PageType) {
    buf.fill(0);
    buf[TYPE_OFFSET] = page_type as u8;
    set_first_free(buf, PAGE_HEADER_SIZE as u16);
}

pub fn first_free(buf: &[u8]) -> u16 {
    read_u16(buf, FIRST_FREE_OFFSET)
}

pub fn set_first_free(buf: &mut [u8], offset: u16) {
    write_u16(buf, FIRST_FREE_OFFSET, offset)
}

pub fn prev(buf: &[u8]) -> u64 {
    read_u64(buf, PREV_OFFSET)
}

pub fn set_prev(buf: &mut [u8], page_no: u64) {
    write_u64(buf, PREV_OFFSET, page_no)
}

pub fn next(buf: &[u8]) -> u64 {
    read_u64(buf, NEXT_OFFSET)
}

pub fn set_next(buf: &mut [u8], page_no: u64) {
    write_u64(buf, NEXT_OFFSET, page_no)
}
