//! Pluggable header feeds the ingestion orchestrator pulls from.

use async_trait::async_trait;

use chaintracks_cdn::HeaderServiceClient;
use chaintracks_core::{ChainHeader, HeightRange, HEADER_SIZE};

use crate::error::EngineError;
use crate::forest::select_best_chain;

/// A feed of recent headers and the best known chain height.
#[async_trait]
pub trait LiveHeaderSource: Send + Sync {
    /// Best known current chain height, possibly stale.
    async fn present_height(&self) -> Result<u32, EngineError>;

    /// Headers covering `range`. May include competing branches for the
    /// same heights; callers select a consistent sub-chain.
    async fn fetch_headers(&self, range: HeightRange) -> Result<Vec<ChainHeader>, EngineError>;
}

/// A feed of raw serialized headers for historical ranges.
#[async_trait]
pub trait BulkHeaderSource: Send + Sync {
    /// Concatenated 80-byte headers covering `range`, in height order.
    /// May fall short when the feed has less than requested.
    async fn fetch_header_bytes(&self, range: HeightRange) -> Result<Vec<u8>, EngineError>;
}

#[async_trait]
impl LiveHeaderSource for HeaderServiceClient {
    async fn present_height(&self) -> Result<u32, EngineError> {
        Ok(HeaderServiceClient::present_height(self).await?)
    }

    async fn fetch_headers(&self, range: HeightRange) -> Result<Vec<ChainHeader>, EngineError> {
        Ok(HeaderServiceClient::fetch_headers(self, range).await?)
    }
}

#[async_trait]
impl BulkHeaderSource for HeaderServiceClient {
    async fn fetch_header_bytes(&self, range: HeightRange) -> Result<Vec<u8>, EngineError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let candidates = HeaderServiceClient::fetch_headers(self, range).await?;
        // The service may surface competing branches; keep the single
        // best chain that starts exactly at the requested height.
        let Some(first) = candidates
            .iter()
            .filter(|c| c.height == range.min_height as u32)
            .min_by_key(|c| c.hash)
        else {
            return Ok(Vec::new());
        };
        let base = chaintracks_core::ChainBoundary {
            hash: first.header.previous_hash,
            chain_work: chaintracks_core::ChainWork::ZERO,
        };
        let best = select_best_chain(&base, range.min_height as u32, &candidates)?;
        let mut out = Vec::with_capacity(best.len() * HEADER_SIZE);
        for header in best {
            out.extend_from_slice(&header.header.serialize());
        }
        Ok(out)
    }
}
