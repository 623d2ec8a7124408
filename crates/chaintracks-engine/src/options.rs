//! Engine configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use chaintracks_bulk::manager::BulkManagerOptions;
use chaintracks_core::Chain;

/// Configuration for a [`Chaintracks`](crate::Chaintracks) engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChaintracksOptions {
    /// Chain to track.
    pub chain: Chain,
    /// Headers per bulk chunk file.
    pub max_per_file: u32,
    /// Chunks allowed to hold resident payload bytes at once.
    pub max_retained: usize,
    /// Depth of recent headers kept live rather than migrated to bulk.
    pub live_height_threshold: u32,
    /// Extra live depth retained to resolve reorgs; migration triggers
    /// once the live window exceeds `live_height_threshold +
    /// reorg_height_threshold`.
    pub reorg_height_threshold: u32,
    /// Headers migrated from live to bulk per batch.
    pub bulk_migration_chunk_size: u32,
    /// URL of a known-good chunk manifest, when one is configured.
    pub manifest_url: Option<String>,
    /// Seconds between polling iterations of the listen loop.
    pub poll_seconds: u64,
    /// File hashes of pre-vetted chunks exempt from replay validation.
    pub allow_list: HashSet<String>,
    /// Known-bad header hashes, hex display form.
    pub denylist: HashSet<chaintracks_core::BlockHash>,
}

impl Default for ChaintracksOptions {
    fn default() -> Self {
        Self::for_chain(Chain::Main)
    }
}

impl ChaintracksOptions {
    /// Defaults for a chain.
    pub fn for_chain(chain: Chain) -> Self {
        ChaintracksOptions {
            chain,
            max_per_file: 10_000,
            max_retained: 8,
            live_height_threshold: 2_000,
            reorg_height_threshold: 400,
            bulk_migration_chunk_size: 500,
            manifest_url: None,
            poll_seconds: 60,
            allow_list: HashSet::new(),
            denylist: HashSet::new(),
        }
    }

    /// The bulk manager options these settings imply.
    pub fn bulk_options(&self) -> BulkManagerOptions {
        BulkManagerOptions {
            chain: self.chain,
            max_retained: self.max_retained,
            max_per_file: self.max_per_file,
            allow_list: self.allow_list.clone(),
            denylist: self.denylist.clone(),
        }
    }

    /// Live depth beyond which migration into bulk starts.
    pub fn migration_trigger_depth(&self) -> u32 {
        self.live_height_threshold + self.reorg_height_threshold
    }
}
