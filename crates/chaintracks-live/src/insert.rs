//! The insertion state machine and live-window maintenance.
//!
//! `LiveStore` wraps any [`LiveStorage`] backend with the one shared
//! implementation of duplicate detection, chain-work accounting, reorg
//! resolution, and pruning support. Mutating sequences run under a
//! single writer lock so partial application is never observable.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use chaintracks_core::{bits_to_work, BlockHash, Chain, ChainBoundary, ChainHeader, HeightRange};

use crate::error::LiveError;
use crate::header::{InsertOutcome, LiveHeader};
use crate::storage::LiveStorage;

/// Where the bulk archive ends: the boundary a first live header must
/// extend.
#[derive(Clone, Copy, Debug)]
pub struct BulkAnchor {
    /// Height the first live header must have.
    pub next_height: u32,
    /// Hash and cumulative work of the last bulk header.
    pub boundary: ChainBoundary,
}

impl BulkAnchor {
    /// The anchor of an empty archive: the first live header is genesis.
    pub fn genesis() -> Self {
        BulkAnchor {
            next_height: 0,
            boundary: ChainBoundary::pre_genesis(),
        }
    }
}

/// The live header window over a pluggable storage backend.
pub struct LiveStore {
    chain: Chain,
    storage: Arc<dyn LiveStorage>,
    write_lock: Mutex<()>,
}

impl LiveStore {
    /// Wrap a storage backend.
    pub fn new(chain: Chain, storage: Arc<dyn LiveStorage>) -> Self {
        LiveStore {
            chain,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// The chain this window tracks.
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Insert a header into the window.
    ///
    /// Expected alternatives (`Duplicate`, `NoPrevious`, `BadPrevious`)
    /// come back as [`InsertOutcome`] variants. A missing tip or a reorg
    /// running out of ancestors is a corrupted store and surfaces as an
    /// error.
    pub fn insert_header(
        &self,
        anchor: &BulkAnchor,
        candidate: &ChainHeader,
    ) -> Result<InsertOutcome, LiveError> {
        let _guard = self.write_lock.lock().expect("live writer lock");
        let header = candidate.header;
        // Never trust a caller-supplied hash.
        let hash = header.hash();
        let height = candidate.height;

        if self.storage.find_by_hash(&hash)?.is_some() {
            return Ok(InsertOutcome::Duplicate);
        }

        let one_back = match self.storage.find_by_hash(&header.previous_hash)? {
            Some(one_back) => one_back,
            None => {
                // Only the first live header may link straight into bulk.
                let extends_bulk = self.storage.count()? == 0
                    && header.previous_hash == anchor.boundary.hash
                    && height == anchor.next_height;
                if !extends_bulk {
                    return Ok(InsertOutcome::NoPrevious);
                }
                let chain_work = anchor
                    .boundary
                    .chain_work
                    .add_work(&bits_to_work(header.bits)?)?;
                self.storage.insert(&LiveHeader {
                    header_id: 0,
                    previous_header_id: None,
                    chain_work,
                    is_chain_tip: true,
                    is_active: true,
                    height,
                    hash,
                    header,
                })?;
                debug!(chain = %self.chain, height, %hash, "first live header anchored to bulk");
                return Ok(InsertOutcome::Added {
                    is_active_tip: true,
                    reorg_depth: 0,
                    prior_tip: None,
                });
            }
        };

        if one_back.height + 1 != height {
            return Ok(InsertOutcome::BadPrevious);
        }

        let prior_tip = self.storage.active_tip()?.ok_or(LiveError::NoTip)?;
        let chain_work = one_back.chain_work.add_work(&bits_to_work(header.bits)?)?;
        // Strictly more work wins; an equal-work competitor leaves the
        // first-seen tip in place no matter the arrival order.
        let is_active_tip = chain_work.is_more_work(&prior_tip.chain_work);

        let mut reorg_depth = 0u32;
        if is_active_tip {
            let (fork, new_path) = self.find_fork(&one_back)?;
            reorg_depth = prior_tip.height.min(height) - fork.height;

            // Deactivate the old path from the prior tip down to the
            // fork point, exclusive.
            let mut cursor = prior_tip.clone();
            while cursor.header_id != fork.header_id {
                self.storage.set_flags(cursor.header_id, false, false)?;
                let prev_id = cursor.previous_header_id.ok_or_else(|| {
                    LiveError::InvariantViolation(
                        "active path broke before reaching the fork point".to_string(),
                    )
                })?;
                cursor = self.storage.find_by_id(prev_id)?.ok_or_else(|| {
                    LiveError::InvariantViolation(format!(
                        "active path references missing header id {prev_id}"
                    ))
                })?;
            }
            // A plain extension never enters the loop; the old tip just
            // loses its tip flag.
            if prior_tip.header_id == fork.header_id {
                self.storage.set_flags(prior_tip.header_id, true, false)?;
            }
            // Activate the new path from just above the fork up to
            // one_back.
            for link in new_path.iter().rev() {
                self.storage.set_flags(link.header_id, true, false)?;
            }

            if reorg_depth > 0 {
                warn!(
                    chain = %self.chain,
                    reorg_depth,
                    new_tip = %hash,
                    old_tip = %prior_tip.hash,
                    fork_height = fork.height,
                    "chain reorganization"
                );
            }
        }

        self.storage.insert(&LiveHeader {
            header_id: 0,
            previous_header_id: Some(one_back.header_id),
            chain_work,
            is_chain_tip: is_active_tip,
            is_active: is_active_tip,
            height,
            hash,
            header,
        })?;

        Ok(InsertOutcome::Added {
            is_active_tip,
            reorg_depth,
            prior_tip: Some(prior_tip.hash),
        })
    }

    /// Walk backward from `one_back` to the first active ancestor.
    ///
    /// Returns the fork point and the inactive links crossed on the way
    /// (ordered from `one_back` downward). Running out of ancestors
    /// means the reorg is deeper than the retained window.
    fn find_fork(
        &self,
        one_back: &LiveHeader,
    ) -> Result<(LiveHeader, Vec<LiveHeader>), LiveError> {
        let mut path = Vec::new();
        let mut cursor = one_back.clone();
        while !cursor.is_active {
            path.push(cursor.clone());
            let prev_id = cursor.previous_header_id.ok_or(LiveError::NoActiveAncestor)?;
            cursor = self
                .storage
                .find_by_id(prev_id)?
                .ok_or(LiveError::NoActiveAncestor)?;
        }
        Ok((cursor, path))
    }

    /// The current active chain tip.
    pub fn tip(&self) -> Result<Option<LiveHeader>, LiveError> {
        self.storage.active_tip()
    }

    /// Active-chain coverage.
    pub fn height_range(&self) -> Result<HeightRange, LiveError> {
        self.storage.active_height_range()
    }

    /// Active-chain header at a height.
    pub fn find_header_for_height(&self, height: u32) -> Result<Option<LiveHeader>, LiveError> {
        self.storage.find_active_by_height(height)
    }

    /// Header by hash, on any branch.
    pub fn find_header_for_hash(&self, hash: &BlockHash) -> Result<Option<LiveHeader>, LiveError> {
        self.storage.find_by_hash(hash)
    }

    /// Oldest `count` active headers, for migration into bulk.
    pub fn oldest_active(&self, count: u32) -> Result<Vec<LiveHeader>, LiveError> {
        self.storage.active_ascending(count)
    }

    /// Total rows, across all branches.
    pub fn count(&self) -> Result<u64, LiveError> {
        self.storage.count()
    }

    /// Drop all rows at or below `height`, nulling dangling
    /// `previous_header_id` references first.
    pub fn delete_through(&self, height: u32) -> Result<u64, LiveError> {
        let _guard = self.write_lock.lock().expect("live writer lock");
        self.storage.null_previous_refs(height)?;
        let deleted = self.storage.delete_at_or_below(height)?;
        info!(chain = %self.chain, height, deleted, "pruned live headers into bulk");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLiveStorage;
    use chaintracks_core::{genesis_header, BlockHeader, Chain};

    /// Bits used for ordinary test headers.
    const EASY: u32 = 0x1d00ffff;
    /// Bits carrying 65536x the work of `EASY`.
    const HEAVY: u32 = 0x1c00ffff;

    fn child(prev: &ChainHeader, bits: u32, nonce: u32) -> ChainHeader {
        ChainHeader::new(
            prev.height + 1,
            BlockHeader {
                version: 1,
                previous_hash: prev.hash,
                merkle_root: BlockHash::new([nonce as u8; 32]),
                time: 1_600_000_000 + nonce,
                bits,
                nonce,
            },
        )
    }

    fn genesis() -> ChainHeader {
        ChainHeader::new(0, genesis_header(Chain::Main))
    }

    fn backends() -> Vec<(&'static str, Arc<dyn LiveStorage>, Option<tempfile::TempDir>)> {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        vec![
            ("memory", Arc::new(MemoryLiveStorage::new()), None),
            (
                "sled",
                Arc::new(crate::sled_store::SledLiveStorage::new(&db).unwrap()),
                Some(dir),
            ),
        ]
    }

    /// Seed a store with genesis plus `n` easy headers, returning them.
    fn seed(store: &LiveStore, n: usize) -> Vec<ChainHeader> {
        let anchor = BulkAnchor::genesis();
        let mut headers = vec![genesis()];
        assert!(store.insert_header(&anchor, &headers[0]).unwrap().added());
        for i in 0..n {
            let next = child(headers.last().unwrap(), EASY, i as u32 + 1);
            let outcome = store.insert_header(&anchor, &next).unwrap();
            assert!(outcome.is_active_tip());
            headers.push(next);
        }
        headers
    }

    #[test]
    fn first_header_must_extend_the_bulk_boundary() {
        for (name, storage, _guard) in backends() {
            let store = LiveStore::new(Chain::Main, storage);
            let anchor = BulkAnchor::genesis();

            // A header that does not extend the anchor is an orphan.
            let stray = child(&genesis(), EASY, 7);
            assert_eq!(
                store.insert_header(&anchor, &stray).unwrap(),
                InsertOutcome::NoPrevious,
                "{name}"
            );

            let outcome = store.insert_header(&anchor, &genesis()).unwrap();
            assert_eq!(
                outcome,
                InsertOutcome::Added {
                    is_active_tip: true,
                    reorg_depth: 0,
                    prior_tip: None,
                },
                "{name}"
            );
            let tip = store.tip().unwrap().unwrap();
            assert_eq!(tip.height, 0);
            assert_eq!(tip.previous_header_id, None);
            assert_eq!(tip.chain_work, bits_to_work(EASY).unwrap());
        }
    }

    #[test]
    fn duplicates_and_bad_links_are_reported_not_errors() {
        for (name, storage, _guard) in backends() {
            let store = LiveStore::new(Chain::Main, storage);
            let headers = seed(&store, 2);
            let anchor = BulkAnchor::genesis();

            assert_eq!(
                store.insert_header(&anchor, &headers[1]).unwrap(),
                InsertOutcome::Duplicate,
                "{name}"
            );

            // Correct parent, wrong claimed height.
            let mut wrong = child(&headers[2], EASY, 99);
            wrong.height += 1;
            assert_eq!(
                store.insert_header(&anchor, &wrong).unwrap(),
                InsertOutcome::BadPrevious,
                "{name}"
            );
        }
    }

    #[test]
    fn plain_extension_moves_the_tip_flag() {
        for (name, storage, _guard) in backends() {
            let store = LiveStore::new(Chain::Main, storage);
            let headers = seed(&store, 1);

            let old_tip = store
                .find_header_for_hash(&headers[0].hash)
                .unwrap()
                .unwrap();
            assert!(old_tip.is_active, "{name}");
            assert!(!old_tip.is_chain_tip, "{name}");

            let tip = store.tip().unwrap().unwrap();
            assert_eq!(tip.hash, headers[1].hash);
            assert_eq!(
                tip.chain_work,
                bits_to_work(EASY).unwrap().add_work(&bits_to_work(EASY).unwrap()).unwrap()
            );
        }
    }

    #[test]
    fn equal_work_competitor_stays_inactive_whichever_arrives_first() {
        for swap in [false, true] {
            let storage: Arc<dyn LiveStorage> = Arc::new(MemoryLiveStorage::new());
            let store = LiveStore::new(Chain::Main, storage);
            let headers = seed(&store, 1);
            let anchor = BulkAnchor::genesis();

            let mut rivals = vec![child(&headers[0], EASY, 41), child(&headers[0], EASY, 42)];
            if swap {
                rivals.swap(0, 1);
            }
            // headers[1] is already in as the tip at this height; both
            // rivals tie its work and must stay inactive.
            for rival in &rivals {
                let outcome = store.insert_header(&anchor, rival).unwrap();
                assert_eq!(
                    outcome,
                    InsertOutcome::Added {
                        is_active_tip: false,
                        reorg_depth: 0,
                        prior_tip: Some(headers[1].hash),
                    }
                );
            }
            assert_eq!(store.tip().unwrap().unwrap().hash, headers[1].hash);
            assert_eq!(store.count().unwrap(), 4);
        }
    }

    #[test]
    fn successor_on_a_losing_branch_triggers_a_reorg() {
        for (name, storage, _guard) in backends() {
            let store = LiveStore::new(Chain::Main, storage);
            // Active chain: genesis .. h3 (tip at height 3).
            let headers = seed(&store, 3);
            let anchor = BulkAnchor::genesis();
            let fork_parent = &headers[2]; // height 2

            // Competing header at the tip height, same work: first seen
            // wins, so the existing tip stays.
            let rival = child(fork_parent, EASY, 77);
            let outcome = store.insert_header(&anchor, &rival).unwrap();
            assert!(!outcome.is_active_tip(), "{name}");
            assert!(
                !store
                    .find_header_for_hash(&rival.hash)
                    .unwrap()
                    .unwrap()
                    .is_active,
                "{name}"
            );

            // A successor lifts the rival branch above the old tip.
            let successor = child(&rival, EASY, 78);
            let outcome = store.insert_header(&anchor, &successor).unwrap();
            assert_eq!(
                outcome,
                InsertOutcome::Added {
                    is_active_tip: true,
                    // fork at height 2, old tip at 3, new tip at 4.
                    reorg_depth: 1,
                    prior_tip: Some(headers[3].hash),
                },
                "{name}"
            );

            // The losing path is inactive and stripped of its tip flag.
            let loser = store
                .find_header_for_hash(&headers[3].hash)
                .unwrap()
                .unwrap();
            assert!(!loser.is_active, "{name}");
            assert!(!loser.is_chain_tip, "{name}");

            // The winning path is fully active up to the new tip.
            for hash in [&rival.hash, &successor.hash] {
                assert!(
                    store.find_header_for_hash(hash).unwrap().unwrap().is_active,
                    "{name}"
                );
            }
            assert_eq!(store.tip().unwrap().unwrap().hash, successor.hash);
            // The fork point itself stays active.
            assert!(
                store
                    .find_header_for_hash(&fork_parent.hash)
                    .unwrap()
                    .unwrap()
                    .is_active,
                "{name}"
            );
        }
    }

    #[test]
    fn heavier_single_header_reorgs_past_a_longer_tip() {
        let storage: Arc<dyn LiveStorage> = Arc::new(MemoryLiveStorage::new());
        let store = LiveStore::new(Chain::Main, storage);
        let headers = seed(&store, 3);
        let anchor = BulkAnchor::genesis();

        // One heavy header from height 1 outweighs the three easy ones.
        let heavy = child(&headers[1], HEAVY, 90);
        let outcome = store.insert_header(&anchor, &heavy).unwrap();
        assert_eq!(
            outcome,
            InsertOutcome::Added {
                is_active_tip: true,
                // fork at height 1, old tip at 3, new tip at 2.
                reorg_depth: 1,
                prior_tip: Some(headers[3].hash),
            }
        );
        assert!(!store
            .find_header_for_hash(&headers[2].hash)
            .unwrap()
            .unwrap()
            .is_active);
        assert!(!store
            .find_header_for_hash(&headers[3].hash)
            .unwrap()
            .unwrap()
            .is_active);
        assert_eq!(store.tip().unwrap().unwrap().hash, heavy.hash);
    }

    #[test]
    fn reorg_deeper_than_the_window_is_an_invariant_error() {
        let storage: Arc<dyn LiveStorage> = Arc::new(MemoryLiveStorage::new());
        let store = LiveStore::new(Chain::Main, storage);
        let headers = seed(&store, 4);
        let anchor = BulkAnchor::genesis();

        // A losing branch off height 2.
        let orphan_parent = child(&headers[2], EASY, 70);
        store.insert_header(&anchor, &orphan_parent).unwrap();

        // Prune through height 2: the branch loses its link downward.
        store.delete_through(2).unwrap();
        assert_eq!(
            store
                .find_header_for_hash(&orphan_parent.hash)
                .unwrap()
                .unwrap()
                .previous_header_id,
            None
        );

        let rescue = child(&orphan_parent, HEAVY, 71);
        let err = store.insert_header(&anchor, &rescue);
        assert!(matches!(err, Err(LiveError::NoActiveAncestor)));
    }

    #[test]
    fn pruning_nulls_dangling_references_before_deleting() {
        for (name, storage, _guard) in backends() {
            let store = LiveStore::new(Chain::Main, storage);
            let headers = seed(&store, 4);

            let oldest = store.oldest_active(2).unwrap();
            assert_eq!(oldest.len(), 2, "{name}");
            assert_eq!(oldest[0].height, 0);
            assert_eq!(oldest[1].height, 1);

            let deleted = store.delete_through(1).unwrap();
            assert_eq!(deleted, 2, "{name}");

            let survivor = store
                .find_header_for_hash(&headers[2].hash)
                .unwrap()
                .unwrap();
            assert_eq!(survivor.previous_header_id, None, "{name}");
            assert_eq!(store.height_range().unwrap(), HeightRange::new(2, 4));
            assert!(store.find_header_for_height(1).unwrap().is_none());
            assert_eq!(store.tip().unwrap().unwrap().hash, headers[4].hash);
        }
    }
}
