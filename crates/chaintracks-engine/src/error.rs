//! Error types for the engine.

use chaintracks_bulk::BulkError;
use chaintracks_core::CoreError;
use chaintracks_live::LiveError;

/// Errors raised by ingestion orchestration and the query facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Header-primitive failure.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Bulk archive failure.
    #[error(transparent)]
    Bulk(#[from] BulkError),
    /// Live window failure.
    #[error(transparent)]
    Live(#[from] LiveError),
    /// A configured header source failed.
    #[error("header source: {0}")]
    Source(String),
    /// Bulk and live coverage no longer form one contiguous interval.
    #[error("engine invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<chaintracks_cdn::CdnError> for EngineError {
    fn from(err: chaintracks_cdn::CdnError) -> Self {
        EngineError::Source(err.to_string())
    }
}
