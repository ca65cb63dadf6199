//! Record payload compression
//!
//! With a codec configured every stored payload starts with a marker byte:
//! `0` for raw bytes, `1` for compressed bytes. Payloads that do not shrink
//! are kept raw. Stores without compression keep payloads verbatim.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::config::Compression;
use crate::error::{Result, StoreError};

const RAW: u8 = 0;
const COMPRESSED: u8 = 1;

/// Encode a payload for storage
pub fn encode(codec: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let packed = match codec {
        Compression::None => return Ok(data.to_vec()),
        Compression::Lz4 => lz4_flex::compress_prepend_size(data),
        Compression::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
    };

    let mut out = Vec::with_capacity(1 + packed.len().min(data.len()));
    if packed.len() < data.len() {
        out.push(COMPRESSED);
        out.extend_from_slice(&packed);
    } else {
        out.push(RAW);
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// Decode a stored payload
pub fn decode(codec: Compression, stored: &[u8]) -> Result<Vec<u8>> {
    if codec == Compression::None {
        return Ok(stored.to_vec());
    }

    let (&marker, body) = stored
        .split_first()
        .ok_or_else(|| StoreError::corruption("compressed record without marker byte"))?;
    match (marker, codec) {
        (RAW, _) => Ok(body.to_vec()),
        (COMPRESSED, Compression::Lz4) => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| StoreError::corruption(format!("lz4 record: {}", e))),
        (COMPRESSED, Compression::Deflate) => {
            let mut out = Vec::new();
            DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map_err(|e| StoreError::corruption(format!("deflate record: {}", e)))?;
            Ok(out)
        }
        (other, _) => Err(StoreError::corruption(format!(
            "unknown record compression marker {}",
            other
        ))),
    }
}
