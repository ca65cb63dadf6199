//! H*Tree Module
//!
//! Persistent extendible hash map built from directory and bucket records.
//!
//! ## Structure
//! ```text
//!                     ┌───────────────────────┐
//!                     │ root directory (d=0)  │  slot = hash byte 0
//!                     └───┬───────────┬───────┘
//!                         │           │
//!              ┌──────────▼──┐   ┌────▼────────────────┐
//!              │ bucket (1)  │   │ directory (d=1)     │  slot = hash byte 1
//!              │ ≤ 8 pairs   │   └────┬────────────────┘
//!              └─────────────┘        │
//!                                ┌────▼────────┐
//!                                │ bucket (2)  │
//!                                └─────────────┘
//! ```
//! Every node is one record. The map header record, bound to the map's
//! name in the named root directory, holds the root recid and codec names.

mod iter;
mod listener;
mod map;
mod node;
mod tree;

pub use iter::{Entries, Keys};
pub use listener::RecordListener;
pub use map::{HTreeMap, SlotKind};
pub use tree::{hash_byte, hash_key, TreeStats, MAX_BUCKET, MAX_DEPTH};
