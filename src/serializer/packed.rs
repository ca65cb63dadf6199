//! Packed integers
//!
//! 7 data bits per byte, most significant group first. Every byte except
//! the last carries the continuation bit 0x80.

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

const CONTINUATION: u8 = 0x80;
const DATA_MASK: u64 = 0x7F;

/// Number of bytes `pack_u64` writes for `value`
pub fn packed_len(value: u64) -> usize {
    let bits = (64 - value.leading_zeros()) as usize;
    bits.div_ceil(7).max(1)
}

pub fn pack_u64<B: BufMut>(out: &mut B, value: u64) {
    let groups = packed_len(value);
    for i in (1..groups).rev() {
        out.put_u8(((value >> (7 * i)) & DATA_MASK) as u8 | CONTINUATION);
    }
    out.put_u8((value & DATA_MASK) as u8);
}

pub fn unpack_u64<B: Buf>(input: &mut B) -> Result<u64> {
    let mut value = 0u64;
    for _ in 0..packed_len(u64::MAX) {
        if !input.has_remaining() {
            return Err(StoreError::Serialization(
                "truncated packed integer".to_string(),
            ));
        }
        if value > u64::MAX >> 7 {
            return Err(StoreError::Serialization(
                "packed integer overflows 64 bits".to_string(),
            ));
        }
        let byte = input.get_u8();
        value = (value << 7) | (byte as u64 & DATA_MASK);
        if byte & CONTINUATION == 0 {
            return Ok(value);
        }
    }
    Err(StoreError::Serialization(
        "packed integer longer than 10 bytes".to_string(),
    ))
}

pub fn unpack_u32<B: Buf>(input: &mut B) -> Result<u32> {
    let value = unpack_u64(input)?;
    u32::try_from(value).map_err(|_| {
        StoreError::Serialization(format!("packed value {} does not fit in 32 bits", value))
    })
}
