//! Append-only violation record stores.

use crate::error::{Result, StorageError};
use parking_lot::RwLock;
use std::path::Path;
use tracing::{debug, info};
use visionsafe_core::ViolationRecord;

const RECORDS_TREE: &str = "violations";

/// Durable, append-only store of violation records
pub trait ViolationStore: Send + Sync {
    /// Append one record, returning its sequence number.
    fn append(&self, record: &ViolationRecord) -> Result<u64>;

    /// Every record in append order.
    fn all(&self) -> Result<Vec<ViolationRecord>>;

    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>> {
        let mut records = self.all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record, returning how many were dropped.
    fn clear(&self) -> Result<usize>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sled-backed store; keys are big-endian sequence numbers so iteration order
/// is append order
pub struct SledViolationStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledViolationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = sled::open(path)?;
        let store = Self::from_db(db)?;
        info!("Opened violation store at {:?} ({} records)", path, store.tree.len());
        Ok(store)
    }

    /// Store that lives only as long as the handle.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let tree = db.open_tree(RECORDS_TREE)?;
        Ok(Self { db, tree })
    }
}

impl ViolationStore for SledViolationStore {
    fn append(&self, record: &ViolationRecord) -> Result<u64> {
        let seq = self.db.generate_id()?;
        let value = serde_json::to_vec(record)?;
        self.tree.insert(seq.to_be_bytes(), value)?;
        debug!("Appended record {} for {}", seq, record.worker_id.label());
        Ok(seq)
    }

    fn all(&self) -> Result<Vec<ViolationRecord>> {
        self.tree
            .iter()
            .map(|entry| -> Result<ViolationRecord> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>> {
        self.tree
            .iter()
            .rev()
            .take(limit)
            .map(|entry| -> Result<ViolationRecord> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }

    fn clear(&self) -> Result<usize> {
        let count = self.tree.len();
        self.tree.clear()?;
        self.tree.flush()?;
        info!("Cleared {} violation records", count);
        Ok(count)
    }

    fn flush(&self) -> Result<()> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| StorageError::Backend(format!("sled flush: {}", e)))
    }
}

/// In-memory store with the same contract
#[derive(Default)]
pub struct MemoryViolationStore {
    records: RwLock<Vec<ViolationRecord>>,
}

impl MemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViolationStore for MemoryViolationStore {
    fn append(&self, record: &ViolationRecord) -> Result<u64> {
        let mut records = self.records.write();
        records.push(record.clone());
        Ok(records.len() as u64 - 1)
    }

    fn all(&self) -> Result<Vec<ViolationRecord>> {
        Ok(self.records.read().clone())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>> {
        Ok(self.records.read().iter().rev().take(limit).cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    fn clear(&self) -> Result<usize> {
        let mut records = self.records.write();
        let count = records.len();
        records.clear();
        Ok(count)
    }
}
