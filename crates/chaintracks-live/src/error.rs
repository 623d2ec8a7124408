//! Error types for the live header store.

use chaintracks_core::CoreError;

/// Errors raised by the live store and its backends.
///
/// `NoTip` and `NoActiveAncestor` are invariant violations, not expected
/// insertion outcomes: they mean the store is corrupted or a reorg ran
/// deeper than the retained window, and need operator attention rather
/// than a retry.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Header-primitive failure (codec, work arithmetic).
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Storage backend failure.
    #[error("live storage: {0}")]
    Storage(String),
    /// The store holds headers but no active chain tip exists.
    #[error("live store has no active chain tip")]
    NoTip,
    /// A reorg walk ran out of ancestors before reaching the active
    /// chain.
    #[error("reorg exceeds the retained live window: no active ancestor found")]
    NoActiveAncestor,
    /// The store contradicts its own invariants.
    #[error("live store invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<sled::Error> for LiveError {
    fn from(err: sled::Error) -> Self {
        LiveError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LiveError {
    fn from(err: serde_json::Error) -> Self {
        LiveError::Storage(err.to_string())
    }
}
