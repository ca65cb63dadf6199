//! Named root directory
//!
//! One record, referenced from the HEADER page, holding `name -> recid`
//! pairs sorted by name:
//!
//! ```text
//! packed count, then per entry: packed name length, utf8 name, packed recid
//! ```

use bytes::Buf;

use crate::error::{Result, StoreError};
use crate::serializer::{pack_u64, unpack_u64};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedRoots {
    entries: Vec<(String, u64)>,
}

impl NamedRoots {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, recid)| *recid)
    }

    /// Bind `name` to `recid`; recid 0 removes the binding
    pub fn set(&mut self, name: &str, recid: u64) {
        match self.entries.binary_search_by(|(entry, _)| entry.as_str().cmp(name)) {
            Ok(pos) if recid == 0 => {
                self.entries.remove(pos);
            }
            Ok(pos) => self.entries[pos].1 = recid,
            Err(_) if recid == 0 => {}
            Err(pos) => self.entries.insert(pos, (name.to_string(), recid)),
        }
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        pack_u64(&mut out, self.entries.len() as u64);
        for (name, recid) in &self.entries {
            pack_u64(&mut out, name.len() as u64);
            out.extend_from_slice(name.as_bytes());
            pack_u64(&mut out, *recid);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let count = unpack_u64(&mut input)? as usize;
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = unpack_u64(&mut input)? as usize;
            if input.remaining() < len {
                return Err(StoreError::corruption("truncated named root entry"));
            }
            let name = std::str::from_utf8(&input[..len])
                .map_err(|_| StoreError::corruption("named root is not utf8"))?
                .to_string();
            input.advance(len);
            entries.push((name, unpack_u64(&mut input)?));
        }
        Ok(Self { entries })
    }
}
