//! Default serializer
//!
//! Dispatches on a one-byte type tag.
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────────────┐
//! │ Tag (1) │ Body                                             │
//! ├─────────┼──────────────────────────────────────────────────┤
//! │ FALSE   │ -                                                │
//! │ TRUE    │ -                                                │
//! │ INT     │ packed value                                     │
//! │ NEG_INT │ packed (-value - 1)                              │
//! │ FLOAT   │ f64 bits (8)                                     │
//! │ BYTES   │ packed len + bytes                               │
//! │ STRING  │ packed len + utf8                                │
//! │ LIST    │ packed count + values                            │
//! │ RECORD  │ packed class id + packed len + payload           │
//! │ USER    │ packed codec id + packed len + payload           │
//! └─────────┴──────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Buf, BufMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

use super::packed::{pack_u64, unpack_u32, unpack_u64};
use super::{from_bytes, to_bytes, Serializer};

const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_NEG_INT: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_STRING: u8 = 7;
const TAG_LIST: u8 = 8;
const TAG_RECORD: u8 = 9;
const TAG_USER: u8 = 10;

/// Dynamically typed value understood by `DefaultSerializer`
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    /// Instance of a registered record class, payload encoded with bincode
    Record { class: String, data: Vec<u8> },
    /// Payload produced by a caller-provided codec
    User { codec: u32, data: Vec<u8> },
}

impl Value {
    /// Wrap a serde value as an instance of record class `class`
    pub fn record<T: Serialize>(class: &str, value: &T) -> Result<Self> {
        Ok(Value::Record {
            class: class.to_string(),
            data: bincode::serialize(value)?,
        })
    }

    /// Decode a record class instance, checking the class name
    pub fn decode_record<T: DeserializeOwned>(&self, class: &str) -> Result<T> {
        match self {
            Value::Record { class: actual, data } if actual == class => {
                Ok(bincode::deserialize(data)?)
            }
            Value::Record { class: actual, .. } => Err(StoreError::Serialization(format!(
                "expected record class {}, found {}",
                class, actual
            ))),
            other => Err(mismatch("record", other)),
        }
    }

    /// Encode `value` with a caller codec and tag it with `codec`
    pub fn user<T>(codec: u32, serializer: &dyn Serializer<T>, value: &T) -> Result<Self> {
        Ok(Value::User {
            codec,
            data: to_bytes(serializer, value)?,
        })
    }

    /// Decode a user-codec value produced with the same codec id
    pub fn decode_user<T>(&self, codec: u32, serializer: &dyn Serializer<T>) -> Result<T> {
        match self {
            Value::User { codec: actual, data } if *actual == codec => {
                from_bytes(serializer, data)
            }
            Value::User { codec: actual, .. } => Err(StoreError::Serialization(format!(
                "expected user codec {}, found {}",
                codec, actual
            ))),
            other => Err(mismatch("user value", other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record { .. } => "record",
            Value::User { .. } => "user value",
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> StoreError {
    StoreError::Serialization(format!("expected {}, found {}", expected, found.kind()))
}

// =============================================================================
// Class Registry
// =============================================================================

/// Maps record class names to the compact ids written on disk
#[derive(Debug, Default, Clone)]
pub struct ClassRegistry {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, String>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `id`. Ids must stay stable for the life of the
    /// store, since they are what the records contain.
    pub fn register(&mut self, name: &str, id: u32) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(StoreError::precondition(format!(
                "record class {} is already registered",
                name
            )));
        }
        if let Some(existing) = self.by_id.get(&id) {
            return Err(StoreError::precondition(format!(
                "class id {} is already taken by {}",
                id, existing
            )));
        }
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, name.to_string());
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// =============================================================================
// Default Serializer
// =============================================================================

/// Tag-dispatching serializer for `Value` and every `Tagged` primitive
#[derive(Debug, Default, Clone)]
pub struct DefaultSerializer {
    registry: Arc<ClassRegistry>,
}

impl DefaultSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializer that can encode record classes known to `registry`
    pub fn with_registry(registry: Arc<ClassRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn write_value(&self, out: &mut Vec<u8>, value: &Value) -> Result<()> {
        match value {
            Value::Bool(false) => out.put_u8(TAG_FALSE),
            Value::Bool(true) => out.put_u8(TAG_TRUE),
            Value::Int(v) if *v >= 0 => {
                out.put_u8(TAG_INT);
                pack_u64(out, *v as u64);
            }
            Value::Int(v) => {
                out.put_u8(TAG_NEG_INT);
                pack_u64(out, !*v as u64);
            }
            Value::Float(v) => {
                out.put_u8(TAG_FLOAT);
                out.put_u64(v.to_bits());
            }
            Value::Bytes(bytes) => {
                out.put_u8(TAG_BYTES);
                write_blob(out, bytes);
            }
            Value::Str(s) => {
                out.put_u8(TAG_STRING);
                write_blob(out, s.as_bytes());
            }
            Value::List(items) => {
                out.put_u8(TAG_LIST);
                pack_u64(out, items.len() as u64);
                for item in items {
                    self.write_value(out, item)?;
                }
            }
            Value::Record { class, data } => {
                let id = self.registry.id_of(class).ok_or_else(|| {
                    StoreError::Serialization(format!("record class {} is not registered", class))
                })?;
                out.put_u8(TAG_RECORD);
                pack_u64(out, id as u64);
                write_blob(out, data);
            }
            Value::User { codec, data } => {
                out.put_u8(TAG_USER);
                pack_u64(out, *codec as u64);
                write_blob(out, data);
            }
        }
        Ok(())
    }

    pub fn read_value(&self, input: &mut &[u8]) -> Result<Value> {
        if !input.has_remaining() {
            return Err(StoreError::Serialization("missing type tag".to_string()));
        }
        let value = match input.get_u8() {
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => {
                let raw = unpack_u64(input)?;
                let v = i64::try_from(raw).map_err(|_| {
                    StoreError::Serialization(format!("integer {} overflows i64", raw))
                })?;
                Value::Int(v)
            }
            TAG_NEG_INT => {
                let raw = unpack_u64(input)?;
                let magnitude = i64::try_from(raw).map_err(|_| {
                    StoreError::Serialization(format!("integer -{} overflows i64", raw))
                })?;
                Value::Int(!magnitude)
            }
            TAG_FLOAT => {
                if input.remaining() < 8 {
                    return Err(StoreError::Serialization("truncated float".to_string()));
                }
                Value::Float(f64::from_bits(input.get_u64()))
            }
            TAG_BYTES => Value::Bytes(read_blob(input)?),
            TAG_STRING => {
                let bytes = read_blob(input)?;
                Value::Str(String::from_utf8(bytes).map_err(|e| {
                    StoreError::Serialization(format!("invalid utf8 string: {}", e))
                })?)
            }
            TAG_LIST => {
                let count = unpack_u64(input)?;
                // Each element needs at least its tag byte
                if count > input.remaining() as u64 {
                    return Err(StoreError::Serialization(format!(
                        "list of {} elements in {} bytes",
                        count,
                        input.remaining()
                    )));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.read_value(input)?);
                }
                Value::List(items)
            }
            TAG_RECORD => {
                let id = unpack_u32(input)?;
                let class = self.registry.name_of(id).ok_or_else(|| {
                    StoreError::Serialization(format!("unknown record class id {}", id))
                })?;
                Value::Record {
                    class: class.to_string(),
                    data: read_blob(input)?,
                }
            }
            TAG_USER => {
                let codec = unpack_u32(input)?;
                Value::User {
                    codec,
                    data: read_blob(input)?,
                }
            }
            other => {
                return Err(StoreError::Serialization(format!(
                    "unknown type tag {}",
                    other
                )))
            }
        };
        Ok(value)
    }
}

fn write_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    pack_u64(out, bytes.len() as u64);
    out.put_slice(bytes);
}

fn read_blob(input: &mut &[u8]) -> Result<Vec<u8>> {
    let len = unpack_u64(input)?;
    if len > input.remaining() as u64 {
        return Err(StoreError::Serialization(format!(
            "blob of {} bytes but only {} remain",
            len,
            input.remaining()
        )));
    }
    let bytes = input[..len as usize].to_vec();
    input.advance(len as usize);
    Ok(bytes)
}

// =============================================================================
// Tagged primitives
// =============================================================================

/// Types `DefaultSerializer` can encode through `Value`
pub trait Tagged: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;
}

impl<T: Tagged> Serializer<T> for DefaultSerializer {
    fn serialize(&self, out: &mut Vec<u8>, value: &T) -> Result<()> {
        self.write_value(out, &value.to_value())
    }

    fn deserialize(&self, input: &mut &[u8]) -> Result<T> {
        T::from_value(self.read_value(input)?)
    }

    fn codec_name(&self) -> &str {
        "default"
    }
}

impl Tagged for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl Tagged for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl Tagged for i64 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int(v) => Ok(v),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl Tagged for i32 {
    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self> {
        let v = i64::from_value(value)?;
        i32::try_from(v)
            .map_err(|_| StoreError::Serialization(format!("{} does not fit in i32", v)))
    }
}

impl Tagged for u32 {
    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self> {
        let v = i64::from_value(value)?;
        u32::try_from(v)
            .map_err(|_| StoreError::Serialization(format!("{} does not fit in u32", v)))
    }
}

/// Stored as the i64 with the same bits, so values above `i64::MAX` come
/// back unchanged but look negative through `Value`.
impl Tagged for u64 {
    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(i64::from_value(value)? as u64)
    }
}

impl Tagged for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(v),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl Tagged for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl Tagged for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}
