//! Log Recovery
//!
//! Handles crash recovery by replaying a committed log into the main file.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;
use crate::page::PagedFile;

use super::{LogFrame, LogReader, LogRecord};

/// Handles log recovery after a crash
pub struct LogRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of page images applied (or applicable) to the main file
    pub frames_recovered: u64,

    /// Whether a COMMIT marker with a matching CRC was found
    pub committed: bool,

    /// Whether the COMMIT marker was present but its CRC did not match
    pub checksum_mismatch: bool,

    /// Whether the log ended in the middle of a record
    pub was_torn: bool,

    /// Log bytes that will not be applied
    pub bytes_discarded: u64,
}

impl LogRecovery {
    /// Read the log and return its frames if, and only if, the transaction
    /// committed. An uncommitted or damaged log yields no frames.
    pub fn recover(path: &Path, page_size: usize) -> Result<(Vec<LogFrame>, RecoveryResult)> {
        let log_len = std::fs::metadata(path)?.len();
        let mut reader = LogReader::open(path, page_size)?;
        let mut frames = Vec::new();
        let mut result = RecoveryResult::default();

        while let Some(record) = reader.next_record()? {
            match record {
                LogRecord::Frame(frame) => frames.push(frame),
                LogRecord::Commit {
                    stored_crc,
                    computed_crc,
                } => {
                    if stored_crc == computed_crc {
                        result.committed = true;
                    } else {
                        result.checksum_mismatch = true;
                    }
                    break;
                }
            }
        }
        result.was_torn = reader.is_torn();

        if result.committed {
            result.frames_recovered = frames.len() as u64;
            result.bytes_discarded = log_len.saturating_sub(reader.position());
        } else {
            frames.clear();
            result.bytes_discarded = log_len;
        }

        Ok((frames, result))
    }

    /// Inspect a log without touching either file
    pub fn verify(path: &Path, page_size: usize) -> Result<RecoveryResult> {
        Self::recover(path, page_size).map(|(_, result)| result)
    }

    /// Apply a committed log to the main file, fsync it, then empty the log.
    /// An uncommitted log is simply emptied.
    pub fn replay(path: &Path, main: &mut PagedFile) -> Result<RecoveryResult> {
        let (frames, result) = Self::recover(path, main.page_size())?;

        for frame in &frames {
            main.write_page(frame.page_no, &frame.image)?;
        }
        if !frames.is_empty() {
            main.sync()?;
        }

        let log = OpenOptions::new().write(true).open(path)?;
        log.set_len(0)?;
        log.sync_data()?;

        if result.committed {
            tracing::info!(
                frames = result.frames_recovered,
                "replayed committed transaction from log"
            );
        } else if result.bytes_discarded > 0 {
            tracing::warn!(
                bytes = result.bytes_discarded,
                torn = result.was_torn,
                checksum_mismatch = result.checksum_mismatch,
                "discarded uncommitted transaction log"
            );
        }

        Ok(result)
    }
}
