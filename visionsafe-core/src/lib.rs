pub mod types;
pub mod error;
pub mod config;
pub mod association;
pub mod evaluation;
pub mod ledger;

pub use error::{CoreError, Result};
pub use types::{
    BoundingBox, Detection, EquipmentClass, TrackId, ViolationKind, ViolationRecord, Worker, WorkerState,
    WorkerStatus,
};
pub use config::{
    AssociationConfig, BodyZone, ConfigError, EvidenceConfig, EvidenceFormat, FiredPolicy, LedgerConfig,
    OverlapMetric, RequiredEquipment, ServerConfig, StorageBackend, StorageConfig, VideoConfig, VisionSafeConfig,
};
pub use association::{PersonAssessment, PpeAssociator};
pub use evaluation::{CandidateViolation, ViolationEvaluator};
pub use ledger::{StrikeLedger, StrikeOutcome};
