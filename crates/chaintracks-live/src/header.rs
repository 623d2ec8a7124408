//! Live header rows and insertion outcomes.

use serde::{Deserialize, Serialize};

use chaintracks_core::{BlockHash, BlockHeader, ChainHeader, ChainWork};

/// A block header held in the mutable live window.
///
/// `header_id` is monotonic and unique per backend instance.
/// `previous_header_id` is `None` only for the header immediately
/// following the last bulk header. At most one header has `is_chain_tip`
/// set, and the headers with `is_active` set form exactly one path from
/// that tip back toward the bulk boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveHeader {
    /// Monotonic row id.
    pub header_id: i64,
    /// Row id of the predecessor, when it is still live.
    pub previous_header_id: Option<i64>,
    /// Cumulative chain work through this header.
    pub chain_work: ChainWork,
    /// True for the single header at the end of the active chain.
    pub is_chain_tip: bool,
    /// True for headers on the active chain.
    pub is_active: bool,
    /// Height of the header.
    pub height: u32,
    /// Recomputed block hash.
    pub hash: BlockHash,
    /// The header fields.
    #[serde(flatten)]
    pub header: BlockHeader,
}

impl LiveHeader {
    /// The row's header situated on the chain, without live bookkeeping.
    pub fn chain_header(&self) -> ChainHeader {
        ChainHeader {
            height: self.height,
            hash: self.hash,
            header: self.header,
        }
    }
}

/// Outcome of inserting a header into the live window.
///
/// These are expected alternative results callers branch on; invariant
/// violations (`NoTip`, `NoActiveAncestor`) surface as
/// [`LiveError`](crate::error::LiveError) instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The header was added.
    Added {
        /// True when the header became the new active chain tip.
        is_active_tip: bool,
        /// Heights unwound from the previously active chain; zero for a
        /// plain extension.
        reorg_depth: u32,
        /// Hash of the tip that was active before this insert, when one
        /// existed.
        prior_tip: Option<BlockHash>,
    },
    /// A header with the same hash is already present.
    Duplicate,
    /// No live header matches `previous_hash` and the header does not
    /// extend the bulk archive into an empty live window.
    NoPrevious,
    /// The previous header exists at the wrong height.
    BadPrevious,
}

impl InsertOutcome {
    /// True when the header was stored.
    pub fn added(&self) -> bool {
        matches!(self, InsertOutcome::Added { .. })
    }

    /// True when the header became the active chain tip.
    pub fn is_active_tip(&self) -> bool {
        matches!(
            self,
            InsertOutcome::Added {
                is_active_tip: true,
                ..
            }
        )
    }
}
