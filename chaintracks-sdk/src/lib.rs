#![deny(missing_docs)]

//! Chaintracks - Complete block-header tracking SDK.
//!
//! Re-exports all Chaintracks components for convenient single-crate
//! usage.

pub use chaintracks_bulk as bulk;
pub use chaintracks_cdn as cdn;
pub use chaintracks_core as core;
pub use chaintracks_engine as engine;
pub use chaintracks_live as live;
