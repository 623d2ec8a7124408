//! The Chaintracks engine: ingestion orchestration and the combined
//! query facade over the bulk archive and live window.
//!
//! Shared state lives behind one async `RwLock`: readers run
//! concurrently, writers are serialized, and every multi-step mutation
//! (insert with reorg, migrate, merge) completes under a single write
//! guard. Migration is additionally collapsed by a re-entrancy flag so
//! overlapping "window too deep" triggers run once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use chaintracks_bulk::{BulkManager, ChunkInfo, MergeSummary};
use chaintracks_core::{
    BlockHash, BlockHeader, Chain, ChainHeader, HeightRange, HEADER_SIZE,
};
use chaintracks_live::{BulkAnchor, InsertOutcome, LiveStore};

use crate::error::EngineError;
use crate::forest::select_best_chain;
use crate::options::ChaintracksOptions;
use crate::sources::{BulkHeaderSource, LiveHeaderSource};

struct EngineState {
    bulk: BulkManager,
    live: LiveStore,
}

impl EngineState {
    fn anchor(&self) -> BulkAnchor {
        BulkAnchor {
            next_height: self.bulk.next_height(),
            boundary: self.bulk.end_boundary(),
        }
    }
}

/// The block-header tracking engine for one chain.
pub struct Chaintracks {
    options: ChaintracksOptions,
    state: RwLock<EngineState>,
    live_source: Arc<dyn LiveHeaderSource>,
    bulk_source: Option<Arc<dyn BulkHeaderSource>>,
    migrating: AtomicBool,
    stop: AtomicBool,
}

impl Chaintracks {
    /// Assemble an engine from its stores and sources.
    pub fn new(
        options: ChaintracksOptions,
        bulk: BulkManager,
        live: LiveStore,
        live_source: Arc<dyn LiveHeaderSource>,
        bulk_source: Option<Arc<dyn BulkHeaderSource>>,
    ) -> Self {
        Chaintracks {
            options,
            state: RwLock::new(EngineState { bulk, live }),
            live_source,
            bulk_source,
            migrating: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        }
    }

    /// The tracked chain.
    pub fn chain(&self) -> Chain {
        self.options.chain
    }

    /// Merge externally obtained chunk descriptors (e.g. a CDN manifest)
    /// into the bulk archive.
    pub async fn merge_chunks(
        &self,
        chunks: Vec<ChunkInfo>,
    ) -> Result<MergeSummary, EngineError> {
        let mut state = self.state.write().await;
        Ok(state.bulk.merge(chunks).await?)
    }

    /// Download the configured known-good manifest and merge its chunks.
    ///
    /// A no-op when no `manifest_url` is configured.
    pub async fn sync_manifest(&self) -> Result<MergeSummary, EngineError> {
        let Some(url) = &self.options.manifest_url else {
            return Ok(MergeSummary::default());
        };
        let (base_url, manifest_path) = url.rsplit_once('/').ok_or_else(|| {
            EngineError::Source(format!("malformed manifest url {url}"))
        })?;
        let client = chaintracks_cdn::CdnClient::new(chaintracks_cdn::CdnConfig {
            base_url: base_url.to_string(),
            manifest_path: manifest_path.to_string(),
            ..Default::default()
        });
        let manifest = client.fetch_manifest().await?;
        info!(chain = %self.options.chain, files = manifest.files.len(), "merging known-good manifest");
        self.merge_chunks(manifest.files).await
    }

    // --- query facade ---

    /// Height of the active chain tip, when any header is present.
    pub async fn current_height(&self) -> Result<Option<u32>, EngineError> {
        let state = self.state.read().await;
        if let Some(tip) = state.live.tip()? {
            return Ok(Some(tip.height));
        }
        let bulk = state.bulk.height_range();
        Ok(if bulk.is_empty() {
            None
        } else {
            Some(bulk.max_height as u32)
        })
    }

    /// The active header at `height`, looked up live-first then bulk.
    pub async fn find_header_for_height(
        &self,
        height: u32,
    ) -> Result<Option<ChainHeader>, EngineError> {
        let mut state = self.state.write().await;
        if let Some(live) = state.live.find_header_for_height(height)? {
            return Ok(Some(live.chain_header()));
        }
        Ok(state.bulk.find_header_for_height(height).await?)
    }

    /// A header by block hash, on any branch.
    pub async fn find_header_for_block_hash(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<ChainHeader>, EngineError> {
        let mut state = self.state.write().await;
        if let Some(live) = state.live.find_header_for_hash(hash)? {
            return Ok(Some(live.chain_header()));
        }
        Ok(state.bulk.find_header_for_hash(hash).await?)
    }

    /// Raw serialized headers starting at `height`, clamped to what the
    /// stores cover.
    pub async fn get_headers(&self, height: u32, count: u32) -> Result<Vec<u8>, EngineError> {
        let range = HeightRange::from_first_count(height, count);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.write().await;
        let mut out = state.bulk.export_headers(range).await?;
        let mut next = height + (out.len() / HEADER_SIZE) as u32;
        while (next as i64) <= range.max_height {
            match state.live.find_header_for_height(next)? {
                Some(live) => {
                    out.extend_from_slice(&live.header.serialize());
                    next += 1;
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Compare a caller-supplied merkle root against the stored header
    /// at `height`. Unknown heights are simply invalid.
    pub async fn is_valid_root_for_height(
        &self,
        root: &BlockHash,
        height: u32,
    ) -> Result<bool, EngineError> {
        Ok(self
            .find_header_for_height(height)
            .await?
            .map(|found| found.header.merkle_root == *root)
            .unwrap_or(false))
    }

    /// Best-effort submission of an externally observed header.
    ///
    /// There is no synchronous confirmation: outcomes and failures are
    /// logged and otherwise swallowed.
    pub async fn add_header(&self, header: BlockHeader) {
        let state = self.state.write().await;
        let anchor = state.anchor();
        let height = match state.live.find_header_for_hash(&header.previous_hash) {
            Ok(Some(prev)) => prev.height + 1,
            Ok(None) if header.previous_hash == anchor.boundary.hash => anchor.next_height,
            Ok(None) => {
                debug!(chain = %self.options.chain, hash = %header.hash(), "submitted header is an orphan");
                return;
            }
            Err(err) => {
                warn!(chain = %self.options.chain, error = %err, "header submission failed");
                return;
            }
        };
        match state
            .live
            .insert_header(&anchor, &ChainHeader::new(height, header))
        {
            Ok(outcome) => {
                debug!(chain = %self.options.chain, height, ?outcome, "submitted header processed")
            }
            Err(err) => {
                warn!(chain = %self.options.chain, height, error = %err, "header submission failed")
            }
        }
    }

    // --- ingestion orchestration ---

    /// Ask the live source for the present height and synchronize to it.
    pub async fn sync_once(&self) -> Result<u32, EngineError> {
        let present = self.live_source.present_height().await?;
        self.sync_to(present).await?;
        Ok(present)
    }

    /// Bring `bulk ∪ live` coverage up to `present_height`.
    ///
    /// Bulk is targeted at `[0, present - live_height_threshold]`; live
    /// headers already covering part of that target migrate into bulk
    /// rather than being fetched again. A bulk gap is fetched extended
    /// through the present height, with the too-recent tail fed to the
    /// live insertion path; otherwise only the residual live gap is
    /// fetched.
    pub async fn sync_to(&self, present_height: u32) -> Result<(), EngineError> {
        let mut state = self.state.write().await;

        // Keep the live window bounded regardless of coverage.
        let live_range = state.live.height_range()?;
        if live_range.length() > self.options.migration_trigger_depth() as u64 {
            let up_to = live_range.max_height as u32 - self.options.live_height_threshold;
            self.migrate_live_to_bulk(&mut state, up_to).await?;
        }

        let covered = self.covered(&state)?;
        if covered.contains_height(present_height as i64) {
            return Ok(());
        }

        let bulk_target = HeightRange::new(
            0,
            present_height as i64 - self.options.live_height_threshold as i64,
        );

        // Never fetch heights already sitting in live: migrate them.
        let live_range = state.live.height_range()?;
        if !bulk_target.is_empty()
            && !live_range.is_empty()
            && live_range.min_height <= bulk_target.max_height
        {
            self.migrate_live_to_bulk(&mut state, bulk_target.max_height as u32)
                .await?;
        }

        let missing_bulk = bulk_target.subtract(&state.bulk.height_range())?;
        if !missing_bulk.is_empty() {
            if let Some(bulk_source) = &self.bulk_source {
                // A bulk gap extends the fetch through the present.
                let fetch = HeightRange::new(missing_bulk.min_height, present_height as i64);
                info!(chain = %self.options.chain, range = %fetch, "fetching bulk headers");
                let bytes = bulk_source.fetch_header_bytes(fetch).await?;
                let fetched = (bytes.len() / HEADER_SIZE) as i64;
                let bulk_count =
                    fetched.min(missing_bulk.max_height - missing_bulk.min_height + 1) as usize;
                state
                    .bulk
                    .add_headers(
                        missing_bulk.min_height as u32,
                        &bytes[..bulk_count * HEADER_SIZE],
                    )
                    .await?;

                // The too-recent tail goes through the live path.
                let tail = &bytes[bulk_count * HEADER_SIZE..];
                if !tail.is_empty() {
                    let first = missing_bulk.min_height as u32 + bulk_count as u32;
                    let mut candidates = Vec::with_capacity(tail.len() / HEADER_SIZE);
                    for (i, raw) in tail.chunks_exact(HEADER_SIZE).enumerate() {
                        candidates
                            .push(ChainHeader::new(first + i as u32, BlockHeader::deserialize(raw)?));
                    }
                    self.insert_live_candidates(&state, &candidates)?;
                }
            } else {
                warn!(chain = %self.options.chain, range = %missing_bulk, "bulk gap but no bulk source configured");
            }
        }

        // Residual gap between coverage and the present height.
        let covered = self.covered(&state)?;
        let live_gap = if covered.is_empty() {
            HeightRange::new(0, present_height as i64)
        } else {
            HeightRange::new(covered.max_height + 1, present_height as i64)
        };
        if !live_gap.is_empty() {
            debug!(chain = %self.options.chain, range = %live_gap, "fetching live headers");
            let candidates = self.live_source.fetch_headers(live_gap).await?;
            self.insert_live_candidates(&state, &candidates)?;
        }
        Ok(())
    }

    /// Poll the live source until stopped, synchronizing each round.
    ///
    /// Cancellation is cooperative: the stop signal is checked every
    /// iteration and every second of the poll delay.
    pub async fn listen(&self) {
        info!(chain = %self.options.chain, "chaintracks listening");
        if let Err(err) = self.sync_manifest().await {
            warn!(chain = %self.options.chain, error = %err, "manifest sync failed");
        }
        while !self.stop.load(Ordering::Relaxed) {
            match self.sync_once().await {
                Ok(present) => {
                    debug!(chain = %self.options.chain, present, "sync round complete")
                }
                Err(err) => warn!(chain = %self.options.chain, error = %err, "sync round failed"),
            }
            let mut waited = 0u64;
            while waited < self.options.poll_seconds && !self.stop.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                waited += 1;
            }
        }
        info!(chain = %self.options.chain, "chaintracks stopped");
    }

    /// Signal the listen loop to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    // --- internals ---

    fn covered(&self, state: &EngineState) -> Result<HeightRange, EngineError> {
        let bulk = state.bulk.height_range();
        let live = state.live.height_range()?;
        bulk.union(&live).map_err(|_| {
            EngineError::InvariantViolation(format!(
                "bulk {bulk} and live {live} coverage are not contiguous"
            ))
        })
    }

    /// Select the best consistent sub-chain among `candidates` and feed
    /// it (then the losers, for fork tracking) through the insertion
    /// state machine.
    fn insert_live_candidates(
        &self,
        state: &EngineState,
        candidates: &[ChainHeader],
    ) -> Result<(), EngineError> {
        if candidates.is_empty() {
            return Ok(());
        }
        let anchor = state.anchor();
        let (base, base_height) = match state.live.tip()? {
            Some(tip) => (
                chaintracks_core::ChainBoundary {
                    hash: tip.hash,
                    chain_work: tip.chain_work,
                },
                tip.height + 1,
            ),
            None => (anchor.boundary, anchor.next_height),
        };

        let best = select_best_chain(&base, base_height, candidates)?;
        let mut rest: Vec<ChainHeader> = candidates
            .iter()
            .filter(|c| !best.iter().any(|b| b.hash == c.hash))
            .copied()
            .collect();
        rest.sort_by_key(|c| (c.height, c.hash));

        for candidate in best.iter().chain(rest.iter()) {
            match state.live.insert_header(&anchor, candidate)? {
                InsertOutcome::Added {
                    is_active_tip,
                    reorg_depth,
                    ..
                } => {
                    if reorg_depth > 0 {
                        info!(chain = %self.options.chain, height = candidate.height, reorg_depth, "reorg while ingesting");
                    } else {
                        debug!(chain = %self.options.chain, height = candidate.height, is_active_tip, "live header added");
                    }
                }
                outcome => {
                    debug!(chain = %self.options.chain, height = candidate.height, ?outcome, "live header skipped")
                }
            }
        }
        Ok(())
    }

    /// Move the oldest active live headers (through `up_to`) into the
    /// bulk archive, batch by batch, then delete the migrated rows.
    ///
    /// The re-entrancy flag collapses overlapping triggers into one
    /// migration.
    async fn migrate_live_to_bulk(
        &self,
        state: &mut EngineState,
        up_to: u32,
    ) -> Result<(), EngineError> {
        if self.migrating.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.migrate_inner(state, up_to).await;
        self.migrating.store(false, Ordering::SeqCst);
        result
    }

    async fn migrate_inner(
        &self,
        state: &mut EngineState,
        up_to: u32,
    ) -> Result<(), EngineError> {
        loop {
            let live_range = state.live.height_range()?;
            if live_range.is_empty() || live_range.min_height as u32 > up_to {
                return Ok(());
            }
            let batch = self
                .options
                .bulk_migration_chunk_size
                .min((up_to as i64 - live_range.min_height + 1) as u32);
            let oldest = state.live.oldest_active(batch)?;
            let Some(last) = oldest.last() else {
                return Ok(());
            };
            let first_height = oldest[0].height;
            let boundary = last.height;
            let mut bytes = Vec::with_capacity(oldest.len() * HEADER_SIZE);
            for header in &oldest {
                bytes.extend_from_slice(&header.header.serialize());
            }
            info!(
                chain = %self.options.chain,
                first_height,
                count = oldest.len(),
                "migrating live headers into bulk"
            );
            state.bulk.add_headers(first_height, &bytes).await?;
            state.live.delete_through(boundary)?;
        }
    }
}
