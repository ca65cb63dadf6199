//! Log Reader
//!
//! Sequential reading of frames and the COMMIT marker from the log file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;

use super::{LogFrame, COMMIT_MAGIC, FRAME_HEADER_SIZE};

/// A record read from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A page post-image
    Frame(LogFrame),

    /// The COMMIT marker with the stored CRC and the CRC of everything read
    /// before it
    Commit { stored_crc: u32, computed_crc: u32 },
}

/// Reads records from the log file
pub struct LogReader {
    reader: BufReader<File>,
    page_size: usize,
    hasher: crc32fast::Hasher,
    /// Bytes consumed so far
    position: u64,
    /// The file ended in the middle of a record
    torn: bool,
}

impl LogReader {
    /// Open a log file for reading
    pub fn open(path: &Path, page_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            page_size,
            hasher: crc32fast::Hasher::new(),
            position: 0,
            torn: false,
        })
    }

    /// Read the next record. `Ok(None)` at end of file, including a torn tail.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        if self.torn {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        let n = self.read_full(&mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < header.len() {
            self.torn = true;
            return Ok(None);
        }

        if &header[0..4] == COMMIT_MAGIC {
            let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let computed_crc = self.hasher.clone().finalize();
            self.position += header.len() as u64;
            return Ok(Some(LogRecord::Commit {
                stored_crc,
                computed_crc,
            }));
        }

        let page_no = u64::from_be_bytes(header);
        let mut image = vec![0u8; self.page_size];
        let n = self.read_full(&mut image)?;
        if n < image.len() {
            self.torn = true;
            return Ok(None);
        }

        self.hasher.update(&header);
        self.hasher.update(&image);
        self.position += (header.len() + image.len()) as u64;
        Ok(Some(LogRecord::Frame(LogFrame { page_no, image })))
    }

    /// Whether reading stopped at an incomplete record
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Bytes of complete records read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill `buf` as far as the file allows; returns the byte count
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}
