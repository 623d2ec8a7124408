#![deny(missing_docs)]

//! The live header window: a bounded, mutable store of recent block
//! headers that tolerates chain reorganizations.
//!
//! The insertion/reorg algorithm is written exactly once, against the
//! [`LiveStorage`] contract; backends only provide lookups and row
//! mutation.

pub mod error;
pub mod header;
pub mod insert;
pub mod sled_store;
pub mod storage;

pub use error::LiveError;
pub use header::{InsertOutcome, LiveHeader};
pub use insert::{BulkAnchor, LiveStore};
pub use sled_store::SledLiveStorage;
pub use storage::{LiveStorage, MemoryLiveStorage};
