//! The record-store contract chunks are mirrored through, with in-memory
//! and sled-backed implementations.
//!
//! The store is passive: the manager owns the canonical sequence and
//! reads/writes rows through this interface; nothing here mutates chunks
//! independently. A row's payload may be empty when the bytes still live
//! at their `source_url`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chaintracks_core::Chain;

use crate::chunk::ChunkInfo;
use crate::error::BulkError;

/// Narrow record-store interface for persisted chunks.
pub trait BulkStorage: Send + Sync {
    /// All chunk rows for `chain`, ordered by `first_height`, with
    /// `file_id` set and payloads left unloaded.
    fn list_chunks(&self, chain: Chain) -> Result<Vec<ChunkInfo>, BulkError>;

    /// Insert a new chunk row, returning its id.
    fn insert_chunk(&self, info: &ChunkInfo, data: &[u8]) -> Result<u64, BulkError>;

    /// Replace an existing row's descriptor and payload.
    fn update_chunk(&self, file_id: u64, info: &ChunkInfo, data: &[u8]) -> Result<(), BulkError>;

    /// Delete a row.
    fn delete_chunk(&self, file_id: u64) -> Result<(), BulkError>;

    /// Read a row's payload. Empty when the payload was never persisted.
    fn read_data(&self, file_id: u64) -> Result<Vec<u8>, BulkError>;
}

/// Volatile store backed by a map; the default when no persistence is
/// configured.
#[derive(Default)]
pub struct MemoryBulkStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: u64,
    rows: BTreeMap<u64, (ChunkInfo, Vec<u8>)>,
}

impl MemoryBulkStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BulkStorage for MemoryBulkStorage {
    fn list_chunks(&self, chain: Chain) -> Result<Vec<ChunkInfo>, BulkError> {
        let inner = self.inner.lock().expect("bulk storage lock");
        let mut rows: Vec<ChunkInfo> = inner
            .rows
            .iter()
            .filter(|(_, (info, _))| info.chain == chain)
            .map(|(id, (info, _))| {
                let mut info = info.clone();
                info.file_id = Some(*id);
                info.data = None;
                info
            })
            .collect();
        rows.sort_by_key(|info| info.first_height);
        Ok(rows)
    }

    fn insert_chunk(&self, info: &ChunkInfo, data: &[u8]) -> Result<u64, BulkError> {
        let mut inner = self.inner.lock().expect("bulk storage lock");
        let id = inner.next_id;
        inner.next_id += 1;
        let mut row = info.clone();
        row.data = None;
        inner.rows.insert(id, (row, data.to_vec()));
        Ok(id)
    }

    fn update_chunk(&self, file_id: u64, info: &ChunkInfo, data: &[u8]) -> Result<(), BulkError> {
        let mut inner = self.inner.lock().expect("bulk storage lock");
        let mut row = info.clone();
        row.data = None;
        row.file_id = Some(file_id);
        inner.rows.insert(file_id, (row, data.to_vec()));
        Ok(())
    }

    fn delete_chunk(&self, file_id: u64) -> Result<(), BulkError> {
        let mut inner = self.inner.lock().expect("bulk storage lock");
        inner.rows.remove(&file_id);
        Ok(())
    }

    fn read_data(&self, file_id: u64) -> Result<Vec<u8>, BulkError> {
        let inner = self.inner.lock().expect("bulk storage lock");
        inner
            .rows
            .get(&file_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| BulkError::Storage(format!("no chunk row with id {file_id}")))
    }
}

const INFO_TREE: &str = "bulk_file_info";
const DATA_TREE: &str = "bulk_file_data";

/// Persistent store on a sled database: one tree for descriptors (JSON),
/// one for payloads, keyed by a big-endian row id.
pub struct SledBulkStorage {
    info: sled::Tree,
    data: sled::Tree,
    db: sled::Db,
}

impl SledBulkStorage {
    /// Open (or create) the chunk trees on `db`.
    pub fn new(db: sled::Db) -> Result<Self, BulkError> {
        Ok(SledBulkStorage {
            info: db.open_tree(INFO_TREE)?,
            data: db.open_tree(DATA_TREE)?,
            db,
        })
    }
}

impl BulkStorage for SledBulkStorage {
    fn list_chunks(&self, chain: Chain) -> Result<Vec<ChunkInfo>, BulkError> {
        let mut rows = Vec::new();
        for entry in self.info.iter() {
            let (key, value) = entry?;
            let mut info: ChunkInfo = serde_json::from_slice(&value)?;
            if info.chain != chain {
                continue;
            }
            let mut id_bytes = [0u8; 8];
            id_bytes.copy_from_slice(&key);
            info.file_id = Some(u64::from_be_bytes(id_bytes));
            rows.push(info);
        }
        rows.sort_by_key(|info| info.first_height);
        Ok(rows)
    }

    fn insert_chunk(&self, info: &ChunkInfo, data: &[u8]) -> Result<u64, BulkError> {
        let id = self.db.generate_id()?;
        let key = id.to_be_bytes();
        self.info.insert(key, serde_json::to_vec(info)?)?;
        self.data.insert(key, data)?;
        Ok(id)
    }

    fn update_chunk(&self, file_id: u64, info: &ChunkInfo, data: &[u8]) -> Result<(), BulkError> {
        let key = file_id.to_be_bytes();
        self.info.insert(key, serde_json::to_vec(info)?)?;
        self.data.insert(key, data)?;
        Ok(())
    }

    fn delete_chunk(&self, file_id: u64) -> Result<(), BulkError> {
        let key = file_id.to_be_bytes();
        self.info.remove(key)?;
        self.data.remove(key)?;
        Ok(())
    }

    fn read_data(&self, file_id: u64) -> Result<Vec<u8>, BulkError> {
        let key = file_id.to_be_bytes();
        match self.data.get(key)? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(BulkError::Storage(format!(
                "no chunk row with id {file_id}"
            ))),
        }
    }
}
