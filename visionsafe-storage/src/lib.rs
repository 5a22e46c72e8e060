pub mod error;
pub mod store;
pub mod writer;
pub mod stats;

pub use error::{Result, StorageError};
pub use store::{MemoryViolationStore, SledViolationStore, ViolationStore};
pub use writer::PersistenceWriter;
pub use stats::{
    analytics, dashboard_stats, report_stats, Analytics, ConfidenceEntry, DashboardStats, LeaderboardEntry, LogEntry,
    ReportStats,
};

use std::sync::Arc;
use visionsafe_core::{StorageBackend, StorageConfig};

/// Open the store selected by configuration.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ViolationStore>> {
    Ok(match config.backend {
        StorageBackend::Sled => Arc::new(SledViolationStore::open(&config.path)?),
        StorageBackend::Memory => Arc::new(MemoryViolationStore::new()),
    })
}
