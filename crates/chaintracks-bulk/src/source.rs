//! Pluggable origin for chunk payload bytes.

use async_trait::async_trait;

use crate::error::BulkError;

/// Fetches chunk payloads by their `source_url`.
///
/// Implementations own transient-fault retry policy; a payload that
/// arrives but fails digest verification is a data-integrity error the
/// manager raises itself and must not be retried here.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Download the raw payload bytes behind `source_url`.
    async fn fetch_chunk(&self, source_url: &str) -> Result<Vec<u8>, BulkError>;
}

/// A source for managers that never page bytes from a CDN; every fetch
/// fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChunkSource;

#[async_trait]
impl ChunkSource for NoChunkSource {
    async fn fetch_chunk(&self, source_url: &str) -> Result<Vec<u8>, BulkError> {
        Err(BulkError::Fetch(format!(
            "no chunk source configured for {source_url}"
        )))
    }
}
