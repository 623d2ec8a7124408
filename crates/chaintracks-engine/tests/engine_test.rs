//! End-to-end engine tests over scripted header sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chaintracks_bulk::{BulkManager, MemoryBulkStorage, NoChunkSource};
use chaintracks_core::{
    genesis_hash, genesis_header, BlockHash, BlockHeader, Chain, ChainHeader, HeightRange,
    HEADER_SIZE,
};
use chaintracks_engine::{BulkHeaderSource, Chaintracks, ChaintracksOptions, EngineError, LiveHeaderSource};
use chaintracks_live::{LiveStore, MemoryLiveStorage};

const EASY: u32 = 0x1d00ffff;
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

/// A linear chain from genesis: heights 0..=top.
fn build_chain(top: u32) -> Vec<ChainHeader> {
    let mut out = vec![ChainHeader::new(0, genesis_header(Chain::Main))];
    for i in 1..=top {
        let next = child(out.last().unwrap(), EASY, i);
        out.push(next);
    }
    out
}

/// Scripted replacement for the CDN and header-service feeds.
#[derive(Default)]
struct ScriptedSource {
    main: Mutex<Vec<ChainHeader>>,
    extras: Mutex<Vec<ChainHeader>>,
    present: AtomicU32,
}

impl ScriptedSource {
    fn new(main: Vec<ChainHeader>, present: u32) -> Arc<Self> {
        let source = Arc::new(Self::default());
        *source.main.lock().unwrap() = main;
        source.present.store(present, Ordering::Relaxed);
        source
    }

    fn script(&self, main: Vec<ChainHeader>, extras: Vec<ChainHeader>, present: u32) {
        *self.main.lock().unwrap() = main;
        *self.extras.lock().unwrap() = extras;
        self.present.store(present, Ordering::Relaxed);
    }
}

#[async_trait]
impl LiveHeaderSource for ScriptedSource {
    async fn present_height(&self) -> Result<u32, EngineError> {
        Ok(self.present.load(Ordering::Relaxed))
    }

    async fn fetch_headers(&self, range: HeightRange) -> Result<Vec<ChainHeader>, EngineError> {
        let mut out: Vec<ChainHeader> = self
            .main
            .lock()
            .unwrap()
            .iter()
            .filter(|h| range.contains_height(h.height as i64))
            .copied()
            .collect();
        out.extend(
            self.extras
                .lock()
                .unwrap()
                .iter()
                .filter(|h| range.contains_height(h.height as i64)),
        );
        Ok(out)
    }
}

#[async_trait]
impl BulkHeaderSource for ScriptedSource {
    async fn fetch_header_bytes(&self, range: HeightRange) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::new();
        for header in self
            .main
            .lock()
            .unwrap()
            .iter()
            .filter(|h| range.contains_height(h.height as i64))
        {
            out.extend_from_slice(&header.header.serialize());
        }
        Ok(out)
    }
}

fn engine(source: &Arc<ScriptedSource>) -> Chaintracks {
    let mut options = ChaintracksOptions::for_chain(Chain::Main);
    options.live_height_threshold = 20;
    options.reorg_height_threshold = 5;
    options.bulk_migration_chunk_size = 10;
    options.max_per_file = 50;
    options.max_retained = 4;
    let bulk = BulkManager::new(
        options.bulk_options(),
        Some(Arc::new(MemoryBulkStorage::new())),
        Arc::new(NoChunkSource),
    );
    let live = LiveStore::new(Chain::Main, Arc::new(MemoryLiveStorage::new()));
    Chaintracks::new(
        options,
        bulk,
        live,
        Arc::clone(source) as Arc<dyn LiveHeaderSource>,
        Some(Arc::clone(source) as Arc<dyn BulkHeaderSource>),
    )
}

#[tokio::test]
async fn empty_engine_has_no_coverage() {
    let source = ScriptedSource::new(Vec::new(), 0);
    let tracker = engine(&source);
    assert_eq!(tracker.current_height().await.unwrap(), None);
    assert!(tracker.find_header_for_height(0).await.unwrap().is_none());
}

#[tokio::test]
async fn initial_sync_covers_bulk_and_live() {
    let chain = build_chain(160);
    let source = ScriptedSource::new(chain[..=120].to_vec(), 120);
    let tracker = engine(&source);

    assert_eq!(tracker.sync_once().await.unwrap(), 120);
    assert_eq!(tracker.current_height().await.unwrap(), Some(120));

    // Genesis is served from bulk and matches the canonical constant.
    let found = tracker.find_header_for_height(0).await.unwrap().unwrap();
    assert_eq!(found.hash, genesis_hash(Chain::Main));
    assert_eq!(
        found.header.serialize(),
        genesis_header(Chain::Main).serialize()
    );

    // Heights on both sides of the bulk/live boundary resolve.
    let bulk_side = tracker.find_header_for_height(42).await.unwrap().unwrap();
    assert_eq!(bulk_side.hash, chain[42].hash);
    let live_side = tracker.find_header_for_height(110).await.unwrap().unwrap();
    assert_eq!(live_side.hash, chain[110].hash);

    // Hash lookups work across both stores too.
    let by_hash = tracker
        .find_header_for_block_hash(&chain[42].hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.height, 42);
    let by_hash = tracker
        .find_header_for_block_hash(&chain[115].hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.height, 115);

    // Byte export spans the boundary seamlessly.
    let bytes = tracker.get_headers(95, 10).await.unwrap();
    let expected: Vec<u8> = chain[95..105]
        .iter()
        .flat_map(|h| h.header.serialize())
        .collect();
    assert_eq!(bytes, expected);
    assert_eq!(bytes.len(), 10 * HEADER_SIZE);

    // Merkle root checks.
    assert!(tracker
        .is_valid_root_for_height(&chain[57].header.merkle_root, 57)
        .await
        .unwrap());
    assert!(!tracker
        .is_valid_root_for_height(&chain[57].header.merkle_root, 58)
        .await
        .unwrap());
    assert!(!tracker
        .is_valid_root_for_height(&chain[57].header.merkle_root, 100_000)
        .await
        .unwrap());
}

#[tokio::test]
async fn catch_up_migrates_live_into_bulk_before_fetching() {
    let chain = build_chain(160);
    let source = ScriptedSource::new(chain[..=120].to_vec(), 120);
    let tracker = engine(&source);
    tracker.sync_once().await.unwrap();

    // The chain advances well past the live window.
    source.script(chain.clone(), Vec::new(), 160);
    tracker.sync_once().await.unwrap();

    assert_eq!(tracker.current_height().await.unwrap(), Some(160));
    // Everything below present - live_height_threshold ended up in bulk;
    // lookups stay correct across the moved boundary.
    for height in [100u32, 125, 140, 141, 160] {
        let found = tracker
            .find_header_for_height(height)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.hash, chain[height as usize].hash, "height {height}");
    }
    let bytes = tracker.get_headers(0, 161).await.unwrap();
    assert_eq!(bytes.len(), 161 * HEADER_SIZE);

    // A second sync at the same height is a no-op.
    tracker.sync_once().await.unwrap();
    assert_eq!(tracker.current_height().await.unwrap(), Some(160));
}

#[tokio::test]
async fn competing_branches_resolve_to_the_most_work() {
    let chain = build_chain(120);
    let source = ScriptedSource::new(chain.clone(), 120);
    let tracker = engine(&source);
    tracker.sync_once().await.unwrap();

    // Two branches appear above the tip; the rival carries more work.
    let main_121 = child(&chain[120], EASY, 200);
    let main_122 = child(&main_121, EASY, 201);
    let rival_121 = child(&chain[120], EASY, 300);
    let rival_122 = child(&rival_121, HEAVY, 301);

    source.script(
        {
            let mut main = chain.clone();
            main.push(main_121);
            main.push(main_122);
            main
        },
        vec![rival_121, rival_122],
        122,
    );
    tracker.sync_once().await.unwrap();

    assert_eq!(tracker.current_height().await.unwrap(), Some(122));
    let tip = tracker.find_header_for_height(122).await.unwrap().unwrap();
    assert_eq!(tip.hash, rival_122.hash);
    let at_121 = tracker.find_header_for_height(121).await.unwrap().unwrap();
    assert_eq!(at_121.hash, rival_121.hash);

    // The losing branch is still known by hash.
    let loser = tracker
        .find_header_for_block_hash(&main_121.hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loser.height, 121);
}

#[tokio::test]
async fn add_header_is_best_effort() {
    let chain = build_chain(30);
    let source = ScriptedSource::new(chain.clone(), 30);
    let tracker = engine(&source);
    tracker.sync_once().await.unwrap();
    assert_eq!(tracker.current_height().await.unwrap(), Some(30));

    // A valid successor advances the tip.
    let next = child(&chain[30], EASY, 500);
    tracker.add_header(next.header).await;
    assert_eq!(tracker.current_height().await.unwrap(), Some(31));

    // An orphan is quietly ignored.
    let orphan = BlockHeader {
        version: 1,
        previous_hash: BlockHash::new([0xee; 32]),
        merkle_root: BlockHash::new([0xee; 32]),
        time: 1,
        bits: EASY,
        nonce: 1,
    };
    tracker.add_header(orphan).await;
    assert_eq!(tracker.current_height().await.unwrap(), Some(31));

    // Resubmitting the tip is a duplicate, not a failure.
    tracker.add_header(next.header).await;
    assert_eq!(tracker.current_height().await.unwrap(), Some(31));
}
