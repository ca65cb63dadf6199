//! Serializer Module
//!
//! Pluggable encoders/decoders used by the record manager and the maps.
//!
//! ## Built-in Serializers
//! - `DefaultSerializer`: tagged encoding of `Value` and common primitives
//! - `BincodeSerializer<T>`: any serde type, via bincode
//! - `RawSerializer`: byte strings stored verbatim

mod packed;
mod value;

use std::marker::PhantomData;

use bytes::Buf;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

pub use packed::{pack_u64, packed_len, unpack_u32, unpack_u64};
pub use value::{ClassRegistry, DefaultSerializer, Tagged, Value};

/// Encoder/decoder pair for values of type `T`
pub trait Serializer<T>: Send + Sync {
    /// Append the encoding of `value` to `out`
    fn serialize(&self, out: &mut Vec<u8>, value: &T) -> Result<()>;

    /// Decode one value, advancing `input` past it
    fn deserialize(&self, input: &mut &[u8]) -> Result<T>;

    /// Name recorded in map headers so a map is reopened with matching codecs
    fn codec_name(&self) -> &str {
        "custom"
    }
}

/// Encode a value into a fresh buffer
pub fn to_bytes<T>(serializer: &dyn Serializer<T>, value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    serializer.serialize(&mut out, value)?;
    Ok(out)
}

/// Decode a value that must span all of `bytes`
pub fn from_bytes<T>(serializer: &dyn Serializer<T>, bytes: &[u8]) -> Result<T> {
    let mut input = bytes;
    let value = serializer.deserialize(&mut input)?;
    if input.has_remaining() {
        return Err(StoreError::Serialization(format!(
            "{} trailing bytes after value",
            input.remaining()
        )));
    }
    Ok(value)
}

// =============================================================================
// Bincode
// =============================================================================

/// Serializer for any serde type
pub struct BincodeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Serializer<T> for BincodeSerializer<T> {
    fn serialize(&self, out: &mut Vec<u8>, value: &T) -> Result<()> {
        bincode::serialize_into(out, value)?;
        Ok(())
    }

    fn deserialize(&self, input: &mut &[u8]) -> Result<T> {
        Ok(bincode::deserialize_from(input)?)
    }

    fn codec_name(&self) -> &str {
        "bincode"
    }
}

// =============================================================================
// Raw bytes
// =============================================================================

/// Stores byte strings as-is; decoding consumes the whole input
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSerializer;

impl Serializer<Vec<u8>> for RawSerializer {
    fn serialize(&self, out: &mut Vec<u8>, value: &Vec<u8>) -> Result<()> {
        out.extend_from_slice(value);
        Ok(())
    }

    fn deserialize(&self, input: &mut &[u8]) -> Result<Vec<u8>> {
        let bytes = input.to_vec();
        input.advance(bytes.len());
        Ok(bytes)
    }

    fn codec_name(&self) -> &str {
        "raw"
    }
}
