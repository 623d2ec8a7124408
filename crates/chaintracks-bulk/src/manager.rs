//! The chunk cache / merge manager.
//!
//! Owns the ordered, gap-free chunk sequence for one chain, reconciles
//! candidate chunks arriving from manifests and local growth, pages
//! payload bytes in on demand, and releases the least-recently-used
//! payloads once more than `max_retained` chunks hold resident bytes.
//! Metadata is never evicted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use chaintracks_core::{
    validate_header_buffer, BlockHash, BlockHeader, Chain, ChainBoundary, ChainHeader,
    HeightRange, HEADER_SIZE,
};

use crate::chunk::{compute_file_hash, ChunkInfo, MergeSummary, INCREMENTAL_FILE_NAME};
use crate::error::BulkError;
use crate::source::ChunkSource;
use crate::store::BulkStorage;

/// Configuration for a [`BulkManager`].
#[derive(Clone, Debug)]
pub struct BulkManagerOptions {
    /// Chain the archive tracks.
    pub chain: Chain,
    /// Maximum number of chunks allowed to hold resident payload bytes.
    pub max_retained: usize,
    /// Maximum headers per chunk file; the incremental chunk is sealed
    /// and rolled once it reaches this count.
    pub max_per_file: u32,
    /// File hashes of pre-vetted chunks exempt from byte-replay
    /// validation.
    pub allow_list: HashSet<String>,
    /// Known-bad header hashes rejected during validation.
    pub denylist: HashSet<BlockHash>,
}

impl BulkManagerOptions {
    /// Defaults for a chain: retain 8 payloads, 10k headers per file.
    pub fn new(chain: Chain) -> Self {
        BulkManagerOptions {
            chain,
            max_retained: 8,
            max_per_file: 10_000,
            allow_list: HashSet::new(),
            denylist: HashSet::new(),
        }
    }
}

/// The bulk archive manager. See the module docs.
pub struct BulkManager {
    options: BulkManagerOptions,
    chunks: Vec<ChunkInfo>,
    storage: Option<Arc<dyn BulkStorage>>,
    source: Arc<dyn ChunkSource>,
    // LRU over resident payloads, keyed by file name; stale queue entries
    // are skipped by stamp comparison.
    lru: VecDeque<(String, u64)>,
    stamps: HashMap<String, u64>,
    clock: u64,
}

impl BulkManager {
    /// Create an empty manager.
    pub fn new(
        options: BulkManagerOptions,
        storage: Option<Arc<dyn BulkStorage>>,
        source: Arc<dyn ChunkSource>,
    ) -> Self {
        BulkManager {
            options,
            chunks: Vec::new(),
            storage,
            source,
            lru: VecDeque::new(),
            stamps: HashMap::new(),
            clock: 0,
        }
    }

    /// Create a manager from persisted rows, reconciled against a seeded
    /// default snapshot.
    ///
    /// When the snapshot's externally-sourced coverage exceeds what the
    /// record store holds, the store contents are fully replaced by the
    /// snapshot; otherwise the snapshot is discarded. The two are never
    /// merged.
    pub fn open(
        options: BulkManagerOptions,
        storage: Option<Arc<dyn BulkStorage>>,
        source: Arc<dyn ChunkSource>,
        seed: Vec<ChunkInfo>,
    ) -> Result<Self, BulkError> {
        let mut manager = Self::new(options, storage, source);

        let mut stored = match &manager.storage {
            Some(storage) => storage.list_chunks(manager.options.chain)?,
            None => Vec::new(),
        };
        stored.sort_by_key(|c| c.first_height);
        let mut seed = seed;
        seed.sort_by_key(|c| c.first_height);

        if external_coverage(&seed) > external_coverage(&stored) {
            if let Some(storage) = &manager.storage {
                info!(
                    chain = %manager.options.chain,
                    "seeded snapshot supersedes record store; replacing stored chunks"
                );
                for row in &stored {
                    if let Some(id) = row.file_id {
                        storage.delete_chunk(id)?;
                    }
                }
                for chunk in &mut seed {
                    let data = chunk.data.clone().unwrap_or_default();
                    chunk.file_id = Some(storage.insert_chunk(chunk, &data)?);
                }
            }
            manager.chunks = seed;
        } else {
            manager.chunks = stored;
        }
        for i in 0..manager.chunks.len() {
            if manager.chunks[i].data.is_some() {
                manager.touch(i);
            }
        }
        manager.check_integrity()?;
        manager.evict();
        Ok(manager)
    }

    /// The chain this archive tracks.
    pub fn chain(&self) -> Chain {
        self.options.chain
    }

    /// The ordered chunk sequence.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Height immediately after the archive, 0 when empty.
    pub fn next_height(&self) -> u32 {
        self.chunks.last().map(|c| c.next_height()).unwrap_or(0)
    }

    /// Heights covered by the archive.
    pub fn height_range(&self) -> HeightRange {
        match self.next_height() {
            0 => HeightRange::EMPTY,
            next => HeightRange::new(0, next as i64 - 1),
        }
    }

    /// Hash and cumulative work at the end of the archive.
    pub fn end_boundary(&self) -> ChainBoundary {
        self.chunks
            .last()
            .map(|c| c.end_boundary())
            .unwrap_or_else(ChainBoundary::pre_genesis)
    }

    /// Number of chunks currently holding resident payload bytes.
    pub fn resident_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.data.is_some()).count()
    }

    /// Reconcile candidate chunks into the sequence.
    ///
    /// Candidates are classified per slot: identical content is a no-op,
    /// a candidate starting where the archive ends is appended (or folded
    /// into the incremental chunk), and a candidate sharing a slot's
    /// first height supersedes it. A superseding chunk that ends before
    /// the data it replaces causes the uncovered tail to be split off
    /// into a fresh incremental chunk rebased onto the candidate's end
    /// boundary.
    pub async fn merge(
        &mut self,
        candidates: Vec<ChunkInfo>,
    ) -> Result<MergeSummary, BulkError> {
        let mut summary = MergeSummary::default();
        let mut candidates = candidates;
        candidates.sort_by_key(|c| c.first_height);

        for candidate in candidates {
            if candidate.chain != self.options.chain {
                return Err(BulkError::WrongChain {
                    file_name: candidate.file_name.clone(),
                    expected: self.options.chain,
                    actual: candidate.chain,
                });
            }

            if let Some(slot) = self
                .chunks
                .iter()
                .position(|c| c.first_height == candidate.first_height)
            {
                if self.chunks[slot].same_content(&candidate) {
                    summary.unchanged += 1;
                    continue;
                }
                self.replace_slot(slot, candidate, &mut summary).await?;
            } else if candidate.first_height == self.next_height() {
                self.append_candidate(candidate, &mut summary).await?;
            } else {
                return Err(BulkError::MisalignedChunk {
                    first_height: candidate.first_height,
                });
            }
        }

        self.check_integrity()?;
        self.evict();
        debug!(
            chain = %self.options.chain,
            unchanged = summary.unchanged,
            inserted = summary.inserted,
            updated = summary.updated,
            dropped = summary.dropped,
            "chunk merge complete"
        );
        Ok(summary)
    }

    /// Append locally obtained headers to the incremental chunk,
    /// sealing and rolling full files along the way.
    ///
    /// `first_height` must be exactly the archive's next height.
    pub async fn add_headers(
        &mut self,
        first_height: u32,
        data: &[u8],
    ) -> Result<(), BulkError> {
        if data.is_empty() {
            return Ok(());
        }
        if data.len() % HEADER_SIZE != 0 {
            return Err(chaintracks_core::CoreError::InvalidBufferLength(data.len()).into());
        }
        if first_height != self.next_height() {
            return Err(BulkError::MisalignedChunk { first_height });
        }

        let max_per_file = self.options.max_per_file;
        let mut offset = 0usize;
        let mut height = first_height;
        while offset < data.len() {
            let grow_last = matches!(self.chunks.last(), Some(last)
                if last.is_incremental() && last.count < max_per_file);

            let slot = if grow_last {
                let slot = self.chunks.len() - 1;
                self.ensure_data(slot).await?;
                let capacity = (max_per_file - self.chunks[slot].count) as usize;
                let take = capacity.min((data.len() - offset) / HEADER_SIZE);
                let slice = &data[offset..offset + take * HEADER_SIZE];
                let prev = self.chunks[slot].end_boundary();
                let boundary = validate_header_buffer(
                    self.options.chain,
                    height,
                    slice,
                    &prev,
                    &self.options.denylist,
                )?;

                let chunk = &mut self.chunks[slot];
                let payload = chunk.data.as_mut().expect("ensured above");
                payload.extend_from_slice(slice);
                chunk.count += take as u32;
                chunk.last_hash = boundary.hash;
                chunk.last_chain_work = boundary.chain_work;
                chunk.file_hash = compute_file_hash(payload);

                offset += take * HEADER_SIZE;
                height += take as u32;
                slot
            } else {
                let take = (max_per_file as usize).min((data.len() - offset) / HEADER_SIZE);
                let slice = &data[offset..offset + take * HEADER_SIZE];
                let prev = self.end_boundary();
                let boundary = validate_header_buffer(
                    self.options.chain,
                    height,
                    slice,
                    &prev,
                    &self.options.denylist,
                )?;

                self.chunks.push(ChunkInfo {
                    chain: self.options.chain,
                    file_name: INCREMENTAL_FILE_NAME.to_string(),
                    first_height: height,
                    count: take as u32,
                    prev_hash: prev.hash,
                    last_hash: boundary.hash,
                    prev_chain_work: prev.chain_work,
                    last_chain_work: boundary.chain_work,
                    file_hash: compute_file_hash(slice),
                    source_url: None,
                    file_id: None,
                    data: Some(slice.to_vec()),
                });
                offset += take * HEADER_SIZE;
                height += take as u32;
                self.chunks.len() - 1
            };

            if self.chunks[slot].count == max_per_file {
                self.seal_incremental(slot);
            }
            self.mirror_upsert(slot)?;
            self.touch(slot);
        }

        self.check_integrity()?;
        self.evict();
        Ok(())
    }

    /// Locate and decode the header at `height`, paging its chunk's
    /// payload in if necessary.
    pub async fn find_header_for_height(
        &mut self,
        height: u32,
    ) -> Result<Option<ChainHeader>, BulkError> {
        if !self.height_range().contains_height(height as i64) {
            return Ok(None);
        }
        let slot = self.slot_for_height(height);
        self.ensure_data(slot).await?;
        let chunk = &self.chunks[slot];
        let offset = (height - chunk.first_height) as usize * HEADER_SIZE;
        let data = chunk.data.as_ref().expect("ensured above");
        let header = BlockHeader::deserialize(&data[offset..offset + HEADER_SIZE])?;
        self.evict();
        Ok(Some(ChainHeader::new(height, header)))
    }

    /// Locate a header by its block hash.
    ///
    /// Uses the previous-hash links of successor headers (and the
    /// archive's end boundary), so no header is rehashed; chunks are
    /// paged in from the tip backwards.
    pub async fn find_header_for_hash(
        &mut self,
        hash: &BlockHash,
    ) -> Result<Option<ChainHeader>, BulkError> {
        if self.chunks.is_empty() {
            return Ok(None);
        }
        if hash.is_zero() {
            return Ok(None);
        }
        // The archive tip is only referenced by its boundary metadata.
        if self.end_boundary().hash == *hash {
            let tip = self.next_height() - 1;
            return self.find_header_for_height(tip).await;
        }
        for slot in (0..self.chunks.len()).rev() {
            self.ensure_data(slot).await?;
            let mut found = None;
            {
                let chunk = &self.chunks[slot];
                let data = chunk.data.as_ref().expect("ensured above");
                for i in 0..chunk.count as usize {
                    let at = i * HEADER_SIZE + 4;
                    if data[at..at + 32] == hash.as_bytes()[..] {
                        // Header i links to the target, one height back.
                        found = Some(chunk.first_height + i as u32 - 1);
                        break;
                    }
                }
            }
            if let Some(height) = found {
                return self.find_header_for_height(height).await;
            }
        }
        self.evict();
        Ok(None)
    }

    /// Export raw serialized headers for the part of `range` the archive
    /// covers.
    pub async fn export_headers(
        &mut self,
        range: HeightRange,
    ) -> Result<Vec<u8>, BulkError> {
        let want = range.intersect(&self.height_range());
        if want.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(want.length() as usize * HEADER_SIZE);
        let mut height = want.min_height as u32;
        while height <= want.max_height as u32 {
            let slot = self.slot_for_height(height);
            self.ensure_data(slot).await?;
            let chunk = &self.chunks[slot];
            let last = (want.max_height as u32).min(chunk.next_height() - 1);
            let from = (height - chunk.first_height) as usize * HEADER_SIZE;
            let to = (last + 1 - chunk.first_height) as usize * HEADER_SIZE;
            out.extend_from_slice(&chunk.data.as_ref().expect("ensured above")[from..to]);
            height = last + 1;
        }
        self.evict();
        Ok(out)
    }

    // --- merge internals ---

    async fn append_candidate(
        &mut self,
        mut candidate: ChunkInfo,
        summary: &mut MergeSummary,
    ) -> Result<(), BulkError> {
        let prev = self.end_boundary();
        check_boundary(&candidate, &prev)?;
        self.validate_candidate(&mut candidate, &prev).await?;

        let fold = matches!(self.chunks.last(), Some(last)
            if last.is_incremental() && candidate.source_url.is_none());
        if fold {
            let slot = self.chunks.len() - 1;
            self.ensure_data(slot).await?;
            let bytes = candidate
                .data
                .as_ref()
                .ok_or_else(|| BulkError::MissingData {
                    file_name: candidate.file_name.clone(),
                })?
                .clone();
            let chunk = &mut self.chunks[slot];
            let payload = chunk.data.as_mut().expect("ensured above");
            payload.extend_from_slice(&bytes);
            chunk.count += candidate.count;
            chunk.last_hash = candidate.last_hash;
            chunk.last_chain_work = candidate.last_chain_work;
            chunk.file_hash = compute_file_hash(payload);
            self.mirror_upsert(slot)?;
            self.touch(slot);
            summary.updated += 1;
        } else {
            let resident = candidate.data.is_some();
            self.chunks.push(candidate);
            let slot = self.chunks.len() - 1;
            self.mirror_upsert(slot)?;
            if resident {
                self.touch(slot);
            }
            summary.inserted += 1;
        }
        Ok(())
    }

    async fn replace_slot(
        &mut self,
        slot: usize,
        mut candidate: ChunkInfo,
        summary: &mut MergeSummary,
    ) -> Result<(), BulkError> {
        let prev = if slot == 0 {
            ChainBoundary::pre_genesis()
        } else {
            self.chunks[slot - 1].end_boundary()
        };
        check_boundary(&candidate, &prev)?;
        self.validate_candidate(&mut candidate, &prev).await?;

        let covered_end = candidate.next_height();

        // Chunks wholly covered by the candidate are superseded; a chunk
        // the candidate only partially covers surrenders its tail to a
        // fresh incremental remainder rebased onto the candidate's end.
        let mut end = slot;
        while end < self.chunks.len() && self.chunks[end].next_height() <= covered_end {
            end += 1;
        }
        let mut remainder = None;
        if end < self.chunks.len() && self.chunks[end].first_height < covered_end {
            self.ensure_data(end).await?;
            let partial = &self.chunks[end];
            let skip = (covered_end - partial.first_height) as usize * HEADER_SIZE;
            let tail = partial.data.as_ref().expect("ensured above")[skip..].to_vec();
            let boundary = validate_header_buffer(
                self.options.chain,
                covered_end,
                &tail,
                &candidate.end_boundary(),
                &self.options.denylist,
            )?;
            remainder = Some(ChunkInfo {
                chain: self.options.chain,
                file_name: INCREMENTAL_FILE_NAME.to_string(),
                first_height: covered_end,
                count: (tail.len() / HEADER_SIZE) as u32,
                prev_hash: candidate.last_hash,
                last_hash: boundary.hash,
                prev_chain_work: candidate.last_chain_work,
                last_chain_work: boundary.chain_work,
                file_hash: compute_file_hash(&tail),
                source_url: None,
                file_id: None,
                data: Some(tail),
            });
            end += 1;
        }

        let removed: Vec<ChunkInfo> = self.chunks.drain(slot..end).collect();
        warn!(
            chain = %self.options.chain,
            slot,
            replaced = removed.len(),
            candidate = %candidate.file_name,
            "superseding chunk slot"
        );
        for old in &removed {
            self.forget(&old.file_name);
            if let (Some(storage), Some(id)) = (&self.storage, old.file_id) {
                storage.delete_chunk(id)?;
            }
        }

        let mut at = slot;
        let resident = candidate.data.is_some();
        self.chunks.insert(at, candidate);
        self.mirror_upsert(at)?;
        if resident {
            self.touch(at);
        }
        if let Some(rem) = remainder {
            at += 1;
            self.chunks.insert(at, rem);
            self.mirror_upsert(at)?;
            self.touch(at);
        }

        summary.updated += 1;
        summary.dropped += removed.len().saturating_sub(1);
        Ok(())
    }

    /// Ensure a candidate's declared content is trustworthy, fetching
    /// bytes when required.
    ///
    /// Allow-listed chunks skip the byte replay; without resident bytes
    /// their metadata is accepted as-is. Everything else has its payload
    /// length and digest checked and its last hash/work re-derived from
    /// the predecessor boundary. Failures here are data-integrity errors:
    /// the chunk is wrong, not late.
    async fn validate_candidate(
        &self,
        candidate: &mut ChunkInfo,
        prev: &ChainBoundary,
    ) -> Result<(), BulkError> {
        let vetted = self.options.allow_list.contains(&candidate.file_hash);
        if candidate.data.is_none() {
            if vetted {
                return Ok(());
            }
            let url = candidate
                .source_url
                .clone()
                .ok_or_else(|| BulkError::MissingData {
                    file_name: candidate.file_name.clone(),
                })?;
            candidate.data = Some(self.source.fetch_chunk(&url).await?);
        }
        let data = candidate.data.as_ref().expect("set above");
        candidate.check_payload(data)?;
        if vetted {
            return Ok(());
        }
        let boundary = validate_header_buffer(
            self.options.chain,
            candidate.first_height,
            data,
            prev,
            &self.options.denylist,
        )?;
        if boundary.hash != candidate.last_hash {
            return Err(BulkError::BoundaryMismatch {
                file_name: candidate.file_name.clone(),
                field: "lastHash",
            });
        }
        if boundary.chain_work != candidate.last_chain_work {
            return Err(BulkError::BoundaryMismatch {
                file_name: candidate.file_name.clone(),
                field: "lastChainWork",
            });
        }
        Ok(())
    }

    // --- payload paging ---

    async fn ensure_data(&mut self, slot: usize) -> Result<(), BulkError> {
        if self.chunks[slot].data.is_some() {
            self.touch(slot);
            return Ok(());
        }

        if let (Some(storage), Some(id)) = (&self.storage, self.chunks[slot].file_id) {
            let bytes = storage.read_data(id)?;
            if !bytes.is_empty() {
                self.chunks[slot].check_payload(&bytes)?;
                self.chunks[slot].data = Some(bytes);
                self.touch(slot);
                return Ok(());
            }
        }

        let url = self.chunks[slot]
            .source_url
            .clone()
            .ok_or_else(|| BulkError::MissingData {
                file_name: self.chunks[slot].file_name.clone(),
            })?;
        debug!(chain = %self.options.chain, url = %url, "paging chunk payload in");
        let bytes = self.source.fetch_chunk(&url).await?;
        self.chunks[slot].check_payload(&bytes)?;
        self.chunks[slot].data = Some(bytes);
        self.mirror_upsert(slot)?;
        self.touch(slot);
        Ok(())
    }

    fn slot_for_height(&self, height: u32) -> usize {
        self.chunks
            .partition_point(|c| c.next_height() <= height)
    }

    fn touch(&mut self, slot: usize) {
        self.clock += 1;
        let name = self.chunks[slot].file_name.clone();
        self.stamps.insert(name.clone(), self.clock);
        self.lru.push_back((name, self.clock));
    }

    fn forget(&mut self, file_name: &str) {
        self.stamps.remove(file_name);
    }

    /// Release least-recently-used payloads until at most `max_retained`
    /// chunks hold resident bytes. Only re-fetchable payloads are
    /// released; metadata always stays.
    fn evict(&mut self) {
        while self.resident_count() > self.options.max_retained {
            let Some((name, stamp)) = self.lru.pop_front() else {
                break;
            };
            if self.stamps.get(&name) != Some(&stamp) {
                continue;
            }
            let Some(slot) = self.chunks.iter().position(|c| c.file_name == name) else {
                continue;
            };
            if self.chunks[slot].data.is_some() && self.chunks[slot].is_refetchable() {
                debug!(chain = %self.options.chain, chunk = %name, "releasing chunk payload");
                self.chunks[slot].data = None;
                self.stamps.remove(&name);
            }
        }
    }

    // --- persistence & invariants ---

    /// Mirror a chunk's current descriptor (and payload, when resident)
    /// to the record store.
    fn mirror_upsert(&mut self, slot: usize) -> Result<(), BulkError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let data = self.chunks[slot].data.clone().unwrap_or_default();
        match self.chunks[slot].file_id {
            Some(id) => storage.update_chunk(id, &self.chunks[slot], &data)?,
            None => {
                let id = storage.insert_chunk(&self.chunks[slot], &data)?;
                self.chunks[slot].file_id = Some(id);
            }
        }
        Ok(())
    }

    /// Verify the sequence invariants: starts at zero, gap-free, boundary
    /// hashes and work agree, incremental chunk only at the tail. Any
    /// violation is an unrecoverable internal error.
    fn check_integrity(&self) -> Result<(), BulkError> {
        let Some(first) = self.chunks.first() else {
            return Ok(());
        };
        if first.first_height != 0 {
            return Err(BulkError::InvariantViolation(format!(
                "first chunk starts at height {}, want 0",
                first.first_height
            )));
        }
        if !first.prev_hash.is_zero() {
            return Err(BulkError::InvariantViolation(
                "genesis chunk has a non-zero previous hash".to_string(),
            ));
        }
        for pair in self.chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.first_height != a.next_height() {
                return Err(BulkError::InvariantViolation(format!(
                    "chunk {} starts at {}, want {}",
                    b.file_name,
                    b.first_height,
                    a.next_height()
                )));
            }
            if b.prev_hash != a.last_hash || b.prev_chain_work != a.last_chain_work {
                return Err(BulkError::InvariantViolation(format!(
                    "chunk {} boundary disagrees with {}",
                    b.file_name, a.file_name
                )));
            }
            if a.is_incremental() {
                return Err(BulkError::InvariantViolation(format!(
                    "incremental chunk {} is not last",
                    a.file_name
                )));
            }
        }
        Ok(())
    }

    /// Seal a full incremental chunk under a permanent derived name.
    fn seal_incremental(&mut self, slot: usize) {
        let chunk = &mut self.chunks[slot];
        chunk.file_name = format!(
            "{}_{:07}.headers",
            self.options.chain, chunk.first_height
        );
        info!(chain = %self.options.chain, chunk = %chunk.file_name, "sealed full chunk file");
    }
}

/// Check a candidate's declared previous boundary against the boundary
/// it must extend.
fn check_boundary(candidate: &ChunkInfo, prev: &ChainBoundary) -> Result<(), BulkError> {
    if candidate.prev_hash != prev.hash {
        return Err(BulkError::BoundaryMismatch {
            file_name: candidate.file_name.clone(),
            field: "prevHash",
        });
    }
    if candidate.prev_chain_work != prev.chain_work {
        return Err(BulkError::BoundaryMismatch {
            file_name: candidate.file_name.clone(),
            field: "prevChainWork",
        });
    }
    Ok(())
}

fn external_coverage(chunks: &[ChunkInfo]) -> u32 {
    chunks
        .iter()
        .filter(|c| c.source_url.is_some())
        .map(|c| c.next_height())
        .max()
        .unwrap_or(0)
}
