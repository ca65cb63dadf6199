//! Transaction Log Module
//!
//! Intention log holding the post-images of every page a transaction
//! dirtied, written and fsynced before the main file is touched.
//!
//! ## Responsibilities
//! - Write all dirty page images plus a COMMIT marker, then fsync
//! - CRC32 over the whole transaction for torn-write detection
//! - On open, replay a committed log into the main file, discard the rest
//! - Truncate after the main file is synced
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Frame 1                                 │
//! │ ┌──────────────┬──────────────────────┐ │
//! │ │ PageNo (8)   │ Page image (P)       │ │
//! │ └──────────────┴──────────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ ... one frame per dirty page ...        │
//! ├─────────────────────────────────────────┤
//! │ COMMIT                                  │
//! │ ┌──────────────┬──────────────────────┐ │
//! │ │ "COMT" (4)   │ CRC32 of frames (4)  │ │
//! │ └──────────────┴──────────────────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Page numbers stay below 2^48, so a frame can never start with "COMT".

mod reader;
mod recovery;
mod writer;

pub use reader::{LogReader, LogRecord};
pub use recovery::{LogRecovery, RecoveryResult};
pub use writer::LogWriter;

/// Magic opening the COMMIT marker
pub const COMMIT_MAGIC: &[u8; 4] = b"COMT";

/// Size of the COMMIT marker
pub const COMMIT_SIZE: usize = 8;

/// Size of a frame header (the page number)
pub const FRAME_HEADER_SIZE: usize = 8;

/// One page post-image from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub page_no: u64,
    pub image: Vec<u8>,
}
