//! The live storage contract and the in-memory backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chaintracks_core::{BlockHash, HeightRange};

use crate::error::LiveError;
use crate::header::LiveHeader;

/// Row-level storage for live headers.
///
/// Backends supply lookups and single-row mutation; the insertion and
/// reorg algorithm lives in [`LiveStore`](crate::insert::LiveStore) and
/// is never duplicated per backend. Multi-row sequences are serialized
/// by the store's writer lock, so backends only need per-call
/// consistency.
pub trait LiveStorage: Send + Sync {
    /// Find a header by block hash.
    fn find_by_hash(&self, hash: &BlockHash) -> Result<Option<LiveHeader>, LiveError>;

    /// Find a header by row id.
    fn find_by_id(&self, header_id: i64) -> Result<Option<LiveHeader>, LiveError>;

    /// All headers at a height, across every branch.
    fn find_by_height(&self, height: u32) -> Result<Vec<LiveHeader>, LiveError>;

    /// The active-chain header at a height, if any.
    fn find_active_by_height(&self, height: u32) -> Result<Option<LiveHeader>, LiveError>;

    /// The unique header with both `is_active` and `is_chain_tip` set.
    fn active_tip(&self) -> Result<Option<LiveHeader>, LiveError>;

    /// Insert a row, assigning and returning the next monotonic id
    /// (the row's `header_id` field is ignored).
    fn insert(&self, header: &LiveHeader) -> Result<i64, LiveError>;

    /// Update a row's `is_active` / `is_chain_tip` flags.
    fn set_flags(&self, header_id: i64, is_active: bool, is_chain_tip: bool)
        -> Result<(), LiveError>;

    /// Null `previous_header_id` on rows whose predecessor sits at or
    /// below `height` (i.e. rows at `height + 1`), ahead of deleting
    /// those predecessors.
    fn null_previous_refs(&self, height: u32) -> Result<(), LiveError>;

    /// Delete all rows at or below `height`, returning how many went.
    fn delete_at_or_below(&self, height: u32) -> Result<u64, LiveError>;

    /// Height coverage of the active chain.
    fn active_height_range(&self) -> Result<HeightRange, LiveError>;

    /// Oldest `count` active headers, ascending by height.
    fn active_ascending(&self, count: u32) -> Result<Vec<LiveHeader>, LiveError>;

    /// Total number of rows, across all branches.
    fn count(&self) -> Result<u64, LiveError>;
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    by_id: BTreeMap<i64, LiveHeader>,
    id_by_hash: HashMap<BlockHash, i64>,
    ids_by_height: BTreeMap<u32, Vec<i64>>,
}

/// Volatile backend on plain maps, the default for tests and embedded
/// use.
#[derive(Default)]
pub struct MemoryLiveStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryLiveStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LiveStorage for MemoryLiveStorage {
    fn find_by_hash(&self, hash: &BlockHash) -> Result<Option<LiveHeader>, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        Ok(inner
            .id_by_hash
            .get(hash)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    fn find_by_id(&self, header_id: i64) -> Result<Option<LiveHeader>, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        Ok(inner.by_id.get(&header_id).cloned())
    }

    fn find_by_height(&self, height: u32) -> Result<Vec<LiveHeader>, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        Ok(inner
            .ids_by_height
            .get(&height)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_active_by_height(&self, height: u32) -> Result<Option<LiveHeader>, LiveError> {
        Ok(self
            .find_by_height(height)?
            .into_iter()
            .find(|h| h.is_active))
    }

    fn active_tip(&self) -> Result<Option<LiveHeader>, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        for ids in inner.ids_by_height.values().rev() {
            for id in ids {
                if let Some(header) = inner.by_id.get(id) {
                    if header.is_active && header.is_chain_tip {
                        return Ok(Some(header.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    fn insert(&self, header: &LiveHeader) -> Result<i64, LiveError> {
        let mut inner = self.inner.lock().expect("live storage lock");
        let id = inner.next_id;
        inner.next_id += 1;
        let mut row = header.clone();
        row.header_id = id;
        inner.id_by_hash.insert(row.hash, id);
        inner.ids_by_height.entry(row.height).or_default().push(id);
        inner.by_id.insert(id, row);
        Ok(id)
    }

    fn set_flags(
        &self,
        header_id: i64,
        is_active: bool,
        is_chain_tip: bool,
    ) -> Result<(), LiveError> {
        let mut inner = self.inner.lock().expect("live storage lock");
        let row = inner.by_id.get_mut(&header_id).ok_or_else(|| {
            LiveError::InvariantViolation(format!("no live header with id {header_id}"))
        })?;
        row.is_active = is_active;
        row.is_chain_tip = is_chain_tip;
        Ok(())
    }

    fn null_previous_refs(&self, height: u32) -> Result<(), LiveError> {
        let mut inner = self.inner.lock().expect("live storage lock");
        let ids: Vec<i64> = inner
            .ids_by_height
            .get(&(height + 1))
            .cloned()
            .unwrap_or_default();
        for id in ids {
            if let Some(row) = inner.by_id.get_mut(&id) {
                row.previous_header_id = None;
            }
        }
        Ok(())
    }

    fn delete_at_or_below(&self, height: u32) -> Result<u64, LiveError> {
        let mut inner = self.inner.lock().expect("live storage lock");
        let doomed: Vec<u32> = inner
            .ids_by_height
            .range(..=height)
            .map(|(h, _)| *h)
            .collect();
        let mut deleted = 0u64;
        for h in doomed {
            if let Some(ids) = inner.ids_by_height.remove(&h) {
                for id in ids {
                    if let Some(row) = inner.by_id.remove(&id) {
                        inner.id_by_hash.remove(&row.hash);
                        deleted += 1;
                    }
                }
            }
        }
        Ok(deleted)
    }

    fn active_height_range(&self) -> Result<HeightRange, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        let mut min = None;
        let mut max = None;
        for (height, ids) in inner.ids_by_height.iter() {
            let active = ids
                .iter()
                .any(|id| inner.by_id.get(id).map(|h| h.is_active).unwrap_or(false));
            if active {
                min = Some(min.unwrap_or(*height).min(*height));
                max = Some(max.unwrap_or(*height).max(*height));
            }
        }
        Ok(match (min, max) {
            (Some(min), Some(max)) => HeightRange::new(min as i64, max as i64),
            _ => HeightRange::EMPTY,
        })
    }

    fn active_ascending(&self, count: u32) -> Result<Vec<LiveHeader>, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        let mut out = Vec::new();
        for ids in inner.ids_by_height.values() {
            for id in ids {
                if let Some(header) = inner.by_id.get(id) {
                    if header.is_active {
                        out.push(header.clone());
                        if out.len() as u32 == count {
                            return Ok(out);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn count(&self) -> Result<u64, LiveError> {
        let inner = self.inner.lock().expect("live storage lock");
        Ok(inner.by_id.len() as u64)
    }
}
