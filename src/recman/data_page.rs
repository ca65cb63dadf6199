//! Slotted data pages (USED-PHYSICAL)
//!
//! ```text
//! ┌────────────┬─────────────────────────┬───────────┬──────────────────┬───────────┐
//! │ Header(20) │ records, growing up ──▶ │   free    │ ◀── slot dir     │ Count (2) │
//! └────────────┴─────────────────────────┴───────────┴──────────────────┴───────────┘
//!                                        ▲ first_free                    page end ▲
//! ```
//!
//! Slot `i` lives at `page_size - 2 - 2 * (i + 1)` and holds the record's
//! offset (0 = free slot). A record starts with a u16: bit 15 is the
//! tombstone, bits 0..14 the length. Length `0x7FFF` marks an oversized
//! record whose 14-byte stub holds a u32 total length and the u64 first
//! OVERFLOW page.
//!
//! A record owns the bytes up to the next live record, so it may grow into
//! dead space left behind it; the last record may also grow into the
//! contiguous free area.

use crate::error::{Result, StoreError};
use crate::page::{
    expect_type, first_free, init_page, read_u16, read_u32, read_u64, set_first_free, write_u16,
    write_u32, write_u64, PageType, PAGE_HEADER_SIZE,
};

/// Size of the in-page record header
pub const RECORD_HEADER_SIZE: usize = 2;

/// Size of one slot directory entry
pub const SLOT_SIZE: usize = 2;

/// Size of the slot counter at the page end
pub const SLOT_COUNT_SIZE: usize = 2;

/// Length value marking an oversized record
pub const OVERSIZE_MARKER: u16 = 0x7FFF;

/// In-page footprint of an oversized record stub
pub const OVERSIZE_STUB: usize = RECORD_HEADER_SIZE + 4 + 8;

const TOMBSTONE: u16 = 0x8000;
const SIZE_MASK: u16 = 0x7FFF;

/// Longest payload stored inline in a page of `page_size` bytes
pub fn max_inline(page_size: usize) -> usize {
    let net = page_size - PAGE_HEADER_SIZE - SLOT_COUNT_SIZE - SLOT_SIZE - RECORD_HEADER_SIZE;
    net.min(OVERSIZE_MARKER as usize - 1)
}

/// In-page footprint of a payload of `len` bytes
pub fn footprint(len: usize, page_size: usize) -> usize {
    if len > max_inline(page_size) {
        OVERSIZE_STUB
    } else {
        RECORD_HEADER_SIZE + len
    }
}

/// A record as it sits in the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredRecord<'a> {
    Inline(&'a [u8]),
    Oversized { len: u32, first_page: u64 },
}

/// View over the bytes of one data page
pub struct DataPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> DataPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Wrap a data page read from disk, rejecting a damaged layout.
    /// Every accessor below assumes a page that passed this check.
    pub fn load(buf: B, page_no: u64) -> Result<Self> {
        expect_type(buf.as_ref(), page_no, PageType::UsedPhysical)?;
        let page = Self::new(buf);
        page.validate()
            .map_err(|problem| StoreError::corruption(format!("data page {}: {}", page_no, problem)))?;
        Ok(page)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let size = self.page_size();
        let count = read_u16(self.bytes(), size - SLOT_COUNT_SIZE) as usize;
        if PAGE_HEADER_SIZE + SLOT_COUNT_SIZE + SLOT_SIZE * count > size {
            return Err(format!("slot count {} overruns the page", count));
        }
        let dir_start = self.dir_start();
        let first_free = self.first_free();
        if first_free < PAGE_HEADER_SIZE || first_free > dir_start {
            return Err(format!("first free offset {} is out of range", first_free));
        }

        let mut live = 0;
        for (slot, offset) in self.live_slots() {
            if offset < PAGE_HEADER_SIZE || offset + RECORD_HEADER_SIZE > first_free {
                return Err(format!("slot {} offset {} is out of range", slot, offset));
            }
            let end = offset + self.footprint_at(offset);
            if end > first_free {
                return Err(format!("record in slot {} ends past {}", slot, first_free));
            }
            live += end - offset;
        }
        if live > first_free - PAGE_HEADER_SIZE {
            return Err("live records overlap".to_string());
        }
        Ok(())
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    fn page_size(&self) -> usize {
        self.bytes().len()
    }

    pub fn slot_count(&self) -> usize {
        read_u16(self.bytes(), self.page_size() - SLOT_COUNT_SIZE) as usize
    }

    fn slot_pos(&self, slot: usize) -> usize {
        self.page_size() - SLOT_COUNT_SIZE - SLOT_SIZE * (slot + 1)
    }

    /// Offset of the record in `slot`, 0 when the slot is free
    pub fn slot_offset(&self, slot: usize) -> usize {
        if slot >= self.slot_count() {
            return 0;
        }
        read_u16(self.bytes(), self.slot_pos(slot)) as usize
    }

    fn dir_start(&self) -> usize {
        self.page_size() - SLOT_COUNT_SIZE - SLOT_SIZE * self.slot_count()
    }

    fn first_free(&self) -> usize {
        first_free(self.bytes()) as usize
    }

    /// Bytes between the record area and the slot directory
    pub fn contiguous_free(&self) -> usize {
        self.dir_start().saturating_sub(self.first_free())
    }

    /// `(slot, offset)` of every live record
    pub fn live_slots(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.slot_count())
            .map(move |slot| (slot, self.slot_offset(slot)))
            .filter(|(_, offset)| *offset != 0)
    }

    fn footprint_at(&self, offset: usize) -> usize {
        let size = read_u16(self.bytes(), offset) & SIZE_MASK;
        if size == OVERSIZE_MARKER {
            OVERSIZE_STUB
        } else {
            RECORD_HEADER_SIZE + size as usize
        }
    }

    /// Bytes occupied by live records
    pub fn live_bytes(&self) -> usize {
        self.live_slots()
            .map(|(_, offset)| self.footprint_at(offset))
            .sum()
    }

    /// Dead bytes inside the record area, reclaimable by compaction
    pub fn fragmented(&self) -> usize {
        self.first_free()
            .saturating_sub(PAGE_HEADER_SIZE)
            .saturating_sub(self.live_bytes())
    }

    /// Contiguous plus fragmented free space
    pub fn free_space(&self) -> usize {
        self.contiguous_free() + self.fragmented()
    }

    fn free_slot(&self) -> Option<usize> {
        (0..self.slot_count()).find(|&slot| self.slot_offset(slot) == 0)
    }

    /// Largest footprint `allocate` can place, compacting if necessary
    pub fn insert_capacity(&self) -> usize {
        let slot_cost = if self.free_slot().is_some() { 0 } else { SLOT_SIZE };
        self.free_space().saturating_sub(slot_cost)
    }

    pub fn is_empty(&self) -> bool {
        self.live_slots().next().is_none()
    }

    /// Footprint the record in `slot` may grow to without moving
    pub fn capacity_of(&self, slot: usize) -> usize {
        let offset = self.slot_offset(slot);
        if offset == 0 {
            return 0;
        }
        let next = self
            .live_slots()
            .map(|(_, other)| other)
            .filter(|&other| other > offset)
            .min();
        match next {
            Some(next) => next - offset,
            None => self.dir_start() - offset,
        }
    }

    /// Read the record in `slot`. `None` for a free slot or a tombstone.
    pub fn read(&self, slot: usize) -> Option<StoredRecord<'_>> {
        let offset = self.slot_offset(slot);
        if offset == 0 {
            return None;
        }
        let bytes = self.bytes();
        let raw = read_u16(bytes, offset);
        if raw & TOMBSTONE != 0 {
            return None;
        }
        let size = raw & SIZE_MASK;
        if size == OVERSIZE_MARKER {
            Some(StoredRecord::Oversized {
                len: read_u32(bytes, offset + RECORD_HEADER_SIZE),
                first_page: read_u64(bytes, offset + RECORD_HEADER_SIZE + 4),
            })
        } else {
            let start = offset + RECORD_HEADER_SIZE;
            Some(StoredRecord::Inline(&bytes[start..start + size as usize]))
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DataPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    /// Turn the buffer into an empty data page
    pub fn init(&mut self) {
        init_page(self.bytes_mut(), PageType::UsedPhysical);
    }

    fn set_slot_count(&mut self, count: usize) {
        let pos = self.page_size() - SLOT_COUNT_SIZE;
        write_u16(self.bytes_mut(), pos, count as u16);
    }

    fn set_slot_offset(&mut self, slot: usize, offset: usize) {
        let pos = self.slot_pos(slot);
        write_u16(self.bytes_mut(), pos, offset as u16);
    }

    /// Reserve `footprint` bytes for a new record and return its slot.
    /// The size header is stamped so the page accounts for the bytes; the
    /// caller then writes the record with `write_inline`/`write_stub`.
    pub fn allocate(&mut self, footprint: usize) -> Option<usize> {
        if self.insert_capacity() < footprint {
            return None;
        }

        let (slot, new_slot) = match self.free_slot() {
            Some(slot) => (slot, false),
            None => (self.slot_count(), true),
        };
        let needed = footprint + if new_slot { SLOT_SIZE } else { 0 };
        if self.contiguous_free() < needed {
            self.compact();
        }

        let offset = self.first_free();
        if new_slot {
            self.set_slot_count(slot + 1);
        }
        self.set_slot_offset(slot, offset);
        write_u16(
            self.bytes_mut(),
            offset,
            (footprint - RECORD_HEADER_SIZE) as u16,
        );
        set_first_free(self.bytes_mut(), (offset + footprint) as u16);
        Some(slot)
    }

    pub fn write_inline(&mut self, slot: usize, data: &[u8]) {
        let offset = self.slot_offset(slot);
        let bytes = self.bytes_mut();
        write_u16(bytes, offset, data.len() as u16);
        let start = offset + RECORD_HEADER_SIZE;
        bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn write_stub(&mut self, slot: usize, len: u32, first_page: u64) {
        let offset = self.slot_offset(slot);
        let bytes = self.bytes_mut();
        write_u16(bytes, offset, OVERSIZE_MARKER);
        write_u32(bytes, offset + RECORD_HEADER_SIZE, len);
        write_u64(bytes, offset + RECORD_HEADER_SIZE + 4, first_page);
    }

    /// Give the record in `slot` a new footprint without moving it.
    /// Returns false when it does not fit.
    pub fn resize(&mut self, slot: usize, footprint: usize) -> bool {
        let offset = self.slot_offset(slot);
        if offset == 0 || footprint > self.capacity_of(slot) {
            return false;
        }
        let old_end = offset + self.footprint_at(offset);
        if old_end >= self.first_free() {
            set_first_free(self.bytes_mut(), (offset + footprint) as u16);
        }
        true
    }

    /// Tombstone the record in `slot` and free the slot
    pub fn remove(&mut self, slot: usize) {
        let offset = self.slot_offset(slot);
        if offset == 0 {
            return;
        }
        let raw = read_u16(self.bytes(), offset);
        write_u16(self.bytes_mut(), offset, raw | TOMBSTONE);
        self.set_slot_offset(slot, 0);

        let mut count = self.slot_count();
        while count > 0 && self.slot_offset(count - 1) == 0 {
            count -= 1;
            self.set_slot_count(count);
        }

        let end = self
            .live_slots()
            .map(|(_, offset)| offset + self.footprint_at(offset))
            .max()
            .unwrap_or(PAGE_HEADER_SIZE);
        set_first_free(self.bytes_mut(), end as u16);
    }

    /// Compact when dead bytes exceed half of the page's free space
    pub fn maybe_compact(&mut self) -> bool {
        let fragmented = self.fragmented();
        if fragmented > 0 && fragmented * 2 > self.free_space() {
            self.compact();
            return true;
        }
        false
    }

    /// Slide live records together at the start of the page. Slots keep
    /// their numbers, so Locations stay valid.
    pub fn compact(&mut self) {
        let mut live: Vec<(usize, usize)> = self.live_slots().collect();
        live.sort_by_key(|(_, offset)| *offset);

        let records: Vec<(usize, Vec<u8>)> = live
            .iter()
            .map(|&(slot, offset)| {
                let end = offset + self.footprint_at(offset);
                (slot, self.bytes()[offset..end].to_vec())
            })
            .collect();

        let dir_start = self.dir_start();
        let mut cursor = PAGE_HEADER_SIZE;
        for (slot, bytes) in &records {
            let end = cursor + bytes.len();
            self.bytes_mut()[cursor..end].copy_from_slice(bytes);
            self.set_slot_offset(*slot, cursor);
            cursor = end;
        }
        self.bytes_mut()[cursor..dir_start].fill(0);
        set_first_free(self.bytes_mut(), cursor as u16);
    }
}
