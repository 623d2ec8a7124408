//! Error types for the bulk archive.

use chaintracks_core::CoreError;

/// Errors raised by the chunk manager and its record stores.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// Header-primitive failure (codec, work arithmetic, broken chain).
    #[error(transparent)]
    Core(#[from] CoreError),
    /// A chunk's byte length does not match its declared header count.
    #[error("chunk {file_name}: payload is {actual} bytes, want {expected}")]
    SizeMismatch {
        /// Offending chunk file name.
        file_name: String,
        /// `count * 80`.
        expected: usize,
        /// Actual payload length.
        actual: usize,
    },
    /// A chunk's payload digest does not match its declared file hash.
    #[error("chunk {file_name}: payload digest {actual} does not match declared {expected}")]
    DigestMismatch {
        /// Offending chunk file name.
        file_name: String,
        /// Declared digest.
        expected: String,
        /// Recomputed digest.
        actual: String,
    },
    /// A chunk's declared boundary disagrees with its neighbors or its
    /// replayed payload.
    #[error("chunk {file_name}: {field} does not match the adjacent boundary")]
    BoundaryMismatch {
        /// Offending chunk file name.
        file_name: String,
        /// Which boundary field disagreed.
        field: &'static str,
    },
    /// A candidate chunk does not start at a chunk boundary of the
    /// current sequence.
    #[error("chunk starting at height {first_height} does not align with the current sequence")]
    MisalignedChunk {
        /// Candidate's first height.
        first_height: u32,
    },
    /// A candidate chunk belongs to a different chain than the manager.
    #[error("chunk {file_name} belongs to chain {actual}, manager tracks {expected}")]
    WrongChain {
        /// Offending chunk file name.
        file_name: String,
        /// Chain the manager tracks.
        expected: chaintracks_core::Chain,
        /// Chain the chunk declared.
        actual: chaintracks_core::Chain,
    },
    /// A payload is needed but is neither resident nor fetchable.
    #[error("chunk {file_name}: payload unavailable (no resident data, source url, or file id)")]
    MissingData {
        /// Offending chunk file name.
        file_name: String,
    },
    /// A payload fetch failed after bounded retries.
    #[error("chunk fetch failed: {0}")]
    Fetch(String),
    /// Record-store backend failure.
    #[error("bulk storage: {0}")]
    Storage(String),
    /// The in-memory sequence violates its own invariants. Unrecoverable;
    /// the store needs operator attention.
    #[error("bulk archive invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<sled::Error> for BulkError {
    fn from(err: sled::Error) -> Self {
        BulkError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BulkError {
    fn from(err: serde_json::Error) -> Self {
        BulkError::Storage(err.to_string())
    }
}
