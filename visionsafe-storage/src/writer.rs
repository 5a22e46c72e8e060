use crate::error::{Result, StorageError};
use crate::store::ViolationStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use visionsafe_core::ViolationRecord;

/// Appends records with bounded retries and exponential backoff.
///
/// Blocks the calling thread while backing off, so it belongs on a blocking
/// pool or a dedicated worker thread.
#[derive(Clone)]
pub struct PersistenceWriter {
    store: Arc<dyn ViolationStore>,
    attempts: u32,
    backoff: Duration,
}

impl PersistenceWriter {
    pub fn new(store: Arc<dyn ViolationStore>, attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn ViolationStore> {
        &self.store
    }

    pub fn write(&self, record: &ViolationRecord) -> Result<u64> {
        let mut last_error = String::new();
        for attempt in 0..self.attempts {
            match self.store.append(record) {
                Ok(seq) => return Ok(seq),
                Err(e) => {
                    warn!(
                        "Record write for {} failed (attempt {}/{}): {}",
                        record.worker_id.label(),
                        attempt + 1,
                        self.attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt + 1 < self.attempts {
                        // 1x, 2x, 4x ... capped at 32x the base delay
                        std::thread::sleep(self.backoff * (1u32 << attempt.min(5)));
                    }
                }
            }
        }
        Err(StorageError::PersistenceWrite {
            attempts: self.attempts,
            reason: last_error,
        })
    }
}
