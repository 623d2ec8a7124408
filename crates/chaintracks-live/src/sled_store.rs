//! Sled-backed live storage.
//!
//! Three trees: rows keyed by big-endian id, a unique hash index, and a
//! height index keyed by `height_be || id_be` so prefix scans walk one
//! height and full scans walk heights in order.

use chaintracks_core::{BlockHash, HeightRange};

use crate::error::LiveError;
use crate::header::LiveHeader;
use crate::storage::LiveStorage;

const ROWS_TREE: &str = "live_headers";
const HASH_TREE: &str = "live_hash_index";
const HEIGHT_TREE: &str = "live_height_index";

/// Persistent live storage on a sled database.
pub struct SledLiveStorage {
    rows: sled::Tree,
    by_hash: sled::Tree,
    by_height: sled::Tree,
}

fn height_key(height: u32, id: i64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&height.to_be_bytes());
    key[4..].copy_from_slice(&(id as u64).to_be_bytes());
    key
}

fn id_from_value(value: &[u8]) -> Result<i64, LiveError> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| LiveError::Storage("malformed id in index".to_string()))?;
    Ok(u64::from_be_bytes(bytes) as i64)
}

impl SledLiveStorage {
    /// Open (or create) the live trees on `db`.
    pub fn new(db: &sled::Db) -> Result<Self, LiveError> {
        Ok(SledLiveStorage {
            rows: db.open_tree(ROWS_TREE)?,
            by_hash: db.open_tree(HASH_TREE)?,
            by_height: db.open_tree(HEIGHT_TREE)?,
        })
    }

    fn load(&self, id: i64) -> Result<Option<LiveHeader>, LiveError> {
        match self.rows.get((id as u64).to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, row: &LiveHeader) -> Result<(), LiveError> {
        self.rows
            .insert((row.header_id as u64).to_be_bytes(), serde_json::to_vec(row)?)?;
        Ok(())
    }
}

impl LiveStorage for SledLiveStorage {
    fn find_by_hash(&self, hash: &BlockHash) -> Result<Option<LiveHeader>, LiveError> {
        match self.by_hash.get(hash.as_bytes())? {
            Some(value) => self.load(id_from_value(&value)?),
            None => Ok(None),
        }
    }

    fn find_by_id(&self, header_id: i64) -> Result<Option<LiveHeader>, LiveError> {
        self.load(header_id)
    }

    fn find_by_height(&self, height: u32) -> Result<Vec<LiveHeader>, LiveError> {
        let mut out = Vec::new();
        for entry in self.by_height.scan_prefix(height.to_be_bytes()) {
            let (_, value) = entry?;
            if let Some(row) = self.load(id_from_value(&value)?)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn find_active_by_height(&self, height: u32) -> Result<Option<LiveHeader>, LiveError> {
        Ok(self
            .find_by_height(height)?
            .into_iter()
            .find(|h| h.is_active))
    }

    fn active_tip(&self) -> Result<Option<LiveHeader>, LiveError> {
        // The tip sits at the top of the active chain; walking the
        // height index backwards finds it in a handful of rows.
        for entry in self.by_height.iter().rev() {
            let (_, value) = entry?;
            if let Some(row) = self.load(id_from_value(&value)?)? {
                if row.is_active && row.is_chain_tip {
                    return Ok(Some(row));
                }
            }
        }
        Ok(None)
    }

    fn insert(&self, header: &LiveHeader) -> Result<i64, LiveError> {
        let id = match self.rows.last()? {
            Some((key, _)) => id_from_value(&key)? + 1,
            None => 0,
        };
        let mut row = header.clone();
        row.header_id = id;
        self.save(&row)?;
        self.by_hash
            .insert(row.hash.as_bytes(), (id as u64).to_be_bytes().to_vec())?;
        self.by_height
            .insert(height_key(row.height, id), (id as u64).to_be_bytes().to_vec())?;
        Ok(id)
    }

    fn set_flags(
        &self,
        header_id: i64,
        is_active: bool,
        is_chain_tip: bool,
    ) -> Result<(), LiveError> {
        let mut row = self.load(header_id)?.ok_or_else(|| {
            LiveError::InvariantViolation(format!("no live header with id {header_id}"))
        })?;
        row.is_active = is_active;
        row.is_chain_tip = is_chain_tip;
        self.save(&row)
    }

    fn null_previous_refs(&self, height: u32) -> Result<(), LiveError> {
        for row in self.find_by_height(height + 1)? {
            if row.previous_header_id.is_some() {
                let mut row = row;
                row.previous_header_id = None;
                self.save(&row)?;
            }
        }
        Ok(())
    }

    fn delete_at_or_below(&self, height: u32) -> Result<u64, LiveError> {
        let mut deleted = 0u64;
        let mut doomed = Vec::new();
        for entry in self.by_height.iter() {
            let (key, value) = entry?;
            let mut height_bytes = [0u8; 4];
            height_bytes.copy_from_slice(&key[..4]);
            if u32::from_be_bytes(height_bytes) > height {
                break;
            }
            doomed.push((key.to_vec(), id_from_value(&value)?));
        }
        for (key, id) in doomed {
            if let Some(row) = self.load(id)? {
                self.by_hash.remove(row.hash.as_bytes())?;
                self.rows.remove((id as u64).to_be_bytes())?;
                deleted += 1;
            }
            self.by_height.remove(key)?;
        }
        Ok(deleted)
    }

    fn active_height_range(&self) -> Result<HeightRange, LiveError> {
        let mut min = None;
        let mut max = None;
        for entry in self.by_height.iter() {
            let (_, value) = entry?;
            if let Some(row) = self.load(id_from_value(&value)?)? {
                if row.is_active {
                    let height = row.height as i64;
                    min = Some(min.unwrap_or(height).min(height));
                    max = Some(max.unwrap_or(height).max(height));
                }
            }
        }
        Ok(match (min, max) {
            (Some(min), Some(max)) => HeightRange::new(min, max),
            _ => HeightRange::EMPTY,
        })
    }

    fn active_ascending(&self, count: u32) -> Result<Vec<LiveHeader>, LiveError> {
        let mut out = Vec::new();
        for entry in self.by_height.iter() {
            let (_, value) = entry?;
            if let Some(row) = self.load(id_from_value(&value)?)? {
                if row.is_active {
                    out.push(row);
                    if out.len() as u32 == count {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }

    fn count(&self) -> Result<u64, LiveError> {
        Ok(self.rows.len() as u64)
    }
}
