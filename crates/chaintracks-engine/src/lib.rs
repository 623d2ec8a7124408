#![deny(missing_docs)]

//! The Chaintracks engine: drives pluggable header sources to keep the
//! bulk archive and live window covering the chain, and serves the
//! combined query facade.

pub mod engine;
pub mod error;
pub mod forest;
pub mod options;
pub mod sources;
pub mod tracker;

pub use engine::Chaintracks;
pub use error::EngineError;
pub use forest::select_best_chain;
pub use options::ChaintracksOptions;
pub use sources::{BulkHeaderSource, LiveHeaderSource};
pub use tracker::ChainTracker;
