#![deny(missing_docs)]

//! The bulk header archive: an ordered, gap-free sequence of hash-verified
//! chunk files starting at genesis, with payloads cached under an LRU
//! budget and mirrored through a narrow record-store contract.

pub mod chunk;
pub mod error;
pub mod manager;
pub mod source;
pub mod store;

pub use chunk::{ChunkInfo, MergeSummary, INCREMENTAL_FILE_NAME};
pub use error::BulkError;
pub use manager::{BulkManager, BulkManagerOptions};
pub use source::{ChunkSource, NoChunkSource};
pub use store::{BulkStorage, MemoryBulkStorage, SledBulkStorage};
