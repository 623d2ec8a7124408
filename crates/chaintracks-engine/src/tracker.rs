//! Chain tracker trait for SPV consumers.

use async_trait::async_trait;

use chaintracks_core::BlockHash;

use crate::engine::Chaintracks;
use crate::error::EngineError;

/// Access to tracked block headers for merkle-root verification.
///
/// SPV proof verification checks a computed merkle root against the
/// stored header at a height; implementors serve that check and the
/// current tip height.
#[async_trait]
pub trait ChainTracker {
    /// Verify that a merkle root is valid for a given block height.
    async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, EngineError>;

    /// Get the current chain tip height.
    async fn current_height(&self) -> Result<u32, EngineError>;
}

#[async_trait]
impl ChainTracker for Chaintracks {
    async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, EngineError> {
        Chaintracks::is_valid_root_for_height(self, root, height).await
    }

    async fn current_height(&self) -> Result<u32, EngineError> {
        Ok(Chaintracks::current_height(self).await?.unwrap_or(0))
    }
}
