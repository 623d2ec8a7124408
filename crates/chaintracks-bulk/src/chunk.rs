//! The chunk descriptor: a contiguous run of headers backed by one
//! hash-verified byte blob.

use serde::{Deserialize, Serialize};

use chaintracks_core::{sha256, BlockHash, Chain, ChainBoundary, ChainWork, HeightRange};

use crate::error::BulkError;

/// Reserved file name of the single mutable trailing chunk that
/// accumulates headers obtained outside any CDN manifest.
pub const INCREMENTAL_FILE_NAME: &str = "incremental.headers";

/// Descriptor of a contiguous run of block headers.
///
/// The payload may be resident in `data`, fetchable from `source_url`,
/// or paged from a record store via `file_id`. Everything except the
/// incremental chunk is immutable once validated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    /// Chain these headers belong to.
    pub chain: Chain,
    /// File name within the archive; unique per sequence.
    pub file_name: String,
    /// Height of the first header in the chunk.
    pub first_height: u32,
    /// Number of 80-byte headers in the chunk.
    pub count: u32,
    /// Hash of the header preceding the chunk (zero for a genesis chunk).
    pub prev_hash: BlockHash,
    /// Hash of the last header in the chunk.
    pub last_hash: BlockHash,
    /// Cumulative chain work before the chunk.
    pub prev_chain_work: ChainWork,
    /// Cumulative chain work through the last header.
    pub last_chain_work: ChainWork,
    /// Hex SHA-256 digest of the concatenated header bytes.
    pub file_hash: String,
    /// CDN-style origin of the payload, when externally sourced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Record-store row id, when the payload is persisted.
    #[serde(skip, default)]
    pub file_id: Option<u64>,
    /// Resident payload bytes, when currently held in memory.
    #[serde(skip, default)]
    pub data: Option<Vec<u8>>,
}

impl ChunkInfo {
    /// The inclusive height range this chunk covers.
    pub fn height_range(&self) -> HeightRange {
        HeightRange::from_first_count(self.first_height, self.count)
    }

    /// Height immediately after the chunk.
    pub fn next_height(&self) -> u32 {
        self.first_height + self.count
    }

    /// The boundary at the end of this chunk.
    pub fn end_boundary(&self) -> ChainBoundary {
        ChainBoundary {
            hash: self.last_hash,
            chain_work: self.last_chain_work,
        }
    }

    /// True for the mutable trailing chunk of locally accumulated headers.
    pub fn is_incremental(&self) -> bool {
        self.source_url.is_none() && self.file_name == INCREMENTAL_FILE_NAME
    }

    /// True when this chunk's payload can be recovered after eviction.
    pub fn is_refetchable(&self) -> bool {
        self.source_url.is_some() || self.file_id.is_some()
    }

    /// Two descriptors describe the same validated content.
    pub fn same_content(&self, other: &ChunkInfo) -> bool {
        self.first_height == other.first_height
            && self.count == other.count
            && self.file_hash == other.file_hash
            && self.prev_hash == other.prev_hash
            && self.last_hash == other.last_hash
    }

    /// Check payload length and digest against the descriptor.
    pub fn check_payload(&self, data: &[u8]) -> Result<(), BulkError> {
        let expected = self.count as usize * chaintracks_core::HEADER_SIZE;
        if data.len() != expected {
            return Err(BulkError::SizeMismatch {
                file_name: self.file_name.clone(),
                expected,
                actual: data.len(),
            });
        }
        let actual = compute_file_hash(data);
        if actual != self.file_hash {
            return Err(BulkError::DigestMismatch {
                file_name: self.file_name.clone(),
                expected: self.file_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Content digest of a chunk payload: hex SHA-256.
pub fn compute_file_hash(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Outcome counts of a [`merge`](crate::manager::BulkManager::merge) pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Candidates already present with identical content.
    pub unchanged: usize,
    /// New chunks added to the sequence.
    pub inserted: usize,
    /// Existing slots replaced or extended.
    pub updated: usize,
    /// Chunks superseded and removed.
    pub dropped: usize,
}

impl MergeSummary {
    /// True when the merge was a complete no-op.
    pub fn is_all_unchanged(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.dropped == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaintracks_core::ChainWork;

    fn chunk(first_height: u32, count: u32) -> ChunkInfo {
        ChunkInfo {
            chain: Chain::Main,
            file_name: "main_0.headers".to_string(),
            first_height,
            count,
            prev_hash: BlockHash::ZERO,
            last_hash: BlockHash::ZERO,
            prev_chain_work: ChainWork::ZERO,
            last_chain_work: ChainWork::ZERO,
            file_hash: String::new(),
            source_url: None,
            file_id: None,
            data: None,
        }
    }

    #[test]
    fn height_range_and_next_height() {
        let c = chunk(100, 50);
        assert_eq!(c.height_range(), HeightRange::new(100, 149));
        assert_eq!(c.next_height(), 150);
    }

    #[test]
    fn payload_checks() {
        let data = vec![0u8; 160];
        let mut c = chunk(0, 2);
        c.file_hash = compute_file_hash(&data);
        assert!(c.check_payload(&data).is_ok());

        assert!(matches!(
            c.check_payload(&data[..80]),
            Err(BulkError::SizeMismatch { .. })
        ));

        c.file_hash = "deadbeef".to_string();
        assert!(matches!(
            c.check_payload(&data),
            Err(BulkError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn manifest_json_uses_camel_case() {
        let mut c = chunk(0, 1);
        c.source_url = Some("https://cdn.example/main_0.headers".to_string());
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"firstHeight\":0"));
        assert!(json.contains("\"sourceUrl\""));
        assert!(!json.contains("\"data\""));
        let back: ChunkInfo = serde_json::from_str(&json).unwrap();
        assert!(back.same_content(&c));
    }
}
