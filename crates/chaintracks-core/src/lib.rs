#![deny(missing_docs)]

//! Block header primitives for the Chaintracks header-tracking engine.
//!
//! Provides the 32-byte block hash type, the fixed 80-byte header codec,
//! compact-difficulty and cumulative chain-work arithmetic, inclusive
//! height-interval algebra, and per-chain genesis constants.

pub mod chain;
pub mod error;
pub mod hash;
pub mod header;
pub mod height_range;
pub mod work;

pub use chain::{genesis_hash, genesis_header, validate_header_buffer, Chain, ChainBoundary};
pub use error::CoreError;
pub use hash::{sha256, sha256d, BlockHash};
pub use header::{BlockHeader, ChainHeader, HEADER_SIZE};
pub use height_range::HeightRange;
pub use work::{bits_to_target, bits_to_work, ChainWork};
