//! # pagekv
//!
//! An embedded, single-process key-value store with:
//! - A paged record manager with stable record ids
//! - An intention log for atomic commit and crash recovery
//! - Persistent H*Tree hash maps
//! - Pluggable serializers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                                │
//! │              (one lock, map handles by name)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   HTreeMap  │─────────▶│ Serializers │
//!   │ (dir/bucket)│          └─────────────┘
//!   └──────┬──────┘
//!          │ recids
//!          ▼
//!   ┌─────────────────────────────────────┐        ┌─────────────┐
//!   │          Record Manager              │──────▶│  Txn Log    │
//!   │ (translation, free lists, slotting)  │ commit│ (.log file) │
//!   └──────────────────┬──────────────────┘        └─────────────┘
//!                      │
//!                      ▼
//!               ┌─────────────┐
//!               │ Page Cache  │
//!               │ Paged File  │
//!               └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod page;
pub mod wal;
pub mod recman;
pub mod serializer;
pub mod htree;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Compression, Options};
pub use htree::{HTreeMap, RecordListener};
pub use recman::{IntegrityReport, RecordManager};
pub use serializer::{BincodeSerializer, DefaultSerializer, RawSerializer, Serializer, Value};
pub use store::Store;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of pagekv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
