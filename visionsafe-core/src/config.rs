// Configuration system for VisionSafe

use crate::types::EquipmentClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What happens to violations of a worker who is already fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiredPolicy {
    /// Keep writing informational records (no strikes accrue)
    Record,
    /// Drop them entirely
    Suppress,
}

/// Strike ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Strike count at which a worker is fired
    pub max_strikes: u32,
    /// Minimum seconds between two counted strikes
    pub cooldown_secs: f64,
    pub fired_policy: FiredPolicy,
    /// Only count a strike when the missing set differs from the last counted one
    pub require_new_signature: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_strikes: 15,
            cooldown_secs: 5.0,
            fired_policy: FiredPolicy::Record,
            require_new_signature: false,
        }
    }
}

impl LedgerConfig {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.cooldown_secs * 1000.0).round() as i64)
    }
}

/// Spatial test deciding whether an equipment box belongs to a person box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlapMetric {
    /// Equipment center lies inside the person box
    CenterInside,
    /// Fraction of the equipment box area inside the person box
    Containment { min_fraction: f32 },
    /// Intersection over union of the two boxes
    Iou { min_iou: f32 },
}

/// Vertical band of the person box, as fractions of its height, where an item's
/// center has to fall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyZone {
    pub class: EquipmentClass,
    pub top: f32,
    pub bottom: f32,
}

impl BodyZone {
    pub fn new(class: &str, top: f32, bottom: f32) -> Self {
        Self {
            class: EquipmentClass::new(class),
            top,
            bottom,
        }
    }
}

/// A required item and the detector classes accepted in its place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredEquipment {
    pub class: EquipmentClass,
    #[serde(default)]
    pub alternatives: Vec<EquipmentClass>,
}

impl RequiredEquipment {
    pub fn new(class: &str) -> Self {
        Self {
            class: EquipmentClass::new(class),
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(class: &str, alternatives: &[&str]) -> Self {
        Self {
            class: EquipmentClass::new(class),
            alternatives: alternatives.iter().map(|a| EquipmentClass::new(*a)).collect(),
        }
    }

    /// True if a detection labelled `label` satisfies this requirement.
    pub fn accepts(&self, label: &str) -> bool {
        self.class.matches(label) || self.alternatives.iter().any(|alt| alt.matches(label))
    }
}

/// PPE association configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Detector label of person detections
    pub person_class: String,
    pub required: Vec<RequiredEquipment>,
    pub metric: OverlapMetric,
    pub zones: Vec<BodyZone>,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            person_class: "person".to_string(),
            required: vec![
                RequiredEquipment::new("Vest"),
                RequiredEquipment::new("Gloves"),
                RequiredEquipment::new("Shoes"),
                RequiredEquipment::with_alternatives("Headgear", &["Helmet", "Welding Helmet", "Goggles"]),
            ],
            metric: OverlapMetric::CenterInside,
            zones: vec![
                BodyZone::new("Helmet", 0.0, 1.0 / 3.0),
                BodyZone::new("Welding Helmet", 0.0, 1.0 / 3.0),
                BodyZone::new("Goggles", 0.0, 0.4),
                BodyZone::new("Vest", 0.2, 0.7),
                BodyZone::new("Shoes", 0.8, 1.0),
            ],
            min_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceFormat {
    Png,
    Jpeg,
}

impl EvidenceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EvidenceFormat::Png => "png",
            EvidenceFormat::Jpeg => "jpg",
        }
    }
}

/// Evidence capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub dir: PathBuf,
    pub format: EvidenceFormat,
    pub jpeg_quality: u8,
    /// Crop to the worker box instead of saving the whole frame
    pub crop_to_worker: bool,
    /// Padding around the worker box as a fraction of its size
    pub crop_padding: f32,
    pub write_attempts: u32,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("evidence_snaps"),
            format: EvidenceFormat::Png,
            jpeg_quality: 90,
            crop_to_worker: true,
            crop_padding: 0.1,
            write_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Violation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sled,
            path: PathBuf::from("data/violations"),
            write_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

/// Video jobs and detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub upload_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub output_extension: String,
    /// Four character codec code handed to the encoder
    pub fourcc: String,
    /// Run the detector on every Nth frame, reusing detections in between
    pub detection_stride: u32,
    /// How long `POST /upload_video` waits for a terminal job state
    pub sync_wait_secs: u64,
    /// Keep uploaded source videos after their job finishes
    pub keep_uploads: bool,
    /// Finished jobs remembered by the job manager
    pub job_history: usize,
    pub max_upload_bytes: usize,
    pub model_path: PathBuf,
    /// Detector class names indexed by class id
    pub class_names: Vec<String>,
    pub detector_confidence: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
    pub tracker_max_age: u32,
    pub tracker_iou_threshold: f32,
    /// Refuse to start when no detector can be built
    pub require_detector: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        let model_path = dirs::home_dir()
            .map(|mut p| {
                p.push(".visionsafe");
                p.push("models");
                p.push("best.onnx");
                p
            })
            .unwrap_or_else(|| PathBuf::from("./models/best.onnx"));

        Self {
            upload_dir: PathBuf::from("uploads"),
            processed_dir: PathBuf::from("processed"),
            output_extension: "webm".to_string(),
            fourcc: "VP80".to_string(),
            detection_stride: 1,
            sync_wait_secs: 30,
            keep_uploads: false,
            job_history: 100,
            max_upload_bytes: 512 * 1024 * 1024,
            model_path,
            class_names: ["person", "Helmet", "Welding Helmet", "Goggles", "Vest", "Gloves", "Shoes"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            detector_confidence: 0.4,
            nms_threshold: 0.45,
            input_size: 640,
            tracker_max_age: 30,
            tracker_iou_threshold: 0.3,
            require_detector: true,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub log_level: String,
    pub cors_permissive: bool,
    pub default_recent_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
            cors_permissive: true,
            default_recent_limit: 10,
        }
    }
}

/// Complete VisionSafe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSafeConfig {
    pub ledger: LedgerConfig,
    pub association: AssociationConfig,
    pub evidence: EvidenceConfig,
    pub storage: StorageConfig,
    pub video: VideoConfig,
    pub server: ServerConfig,
}

impl VisionSafeConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse_str(&content)
    }

    /// Parse configuration text, trying JSON, then TOML, then YAML
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<VisionSafeConfig>(content) {
            return Ok(config);
        }

        let toml_err = match toml::from_str::<VisionSafeConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        match serde_yaml::from_str::<VisionSafeConfig>(content) {
            Ok(config) => Ok(config),
            Err(yaml_err) => Err(ConfigError::ParseError(format!(
                "not valid JSON, TOML ({}) or YAML ({})",
                toml_err, yaml_err
            ))),
        }
    }

    /// Override fields from `VISIONSAFE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("VISIONSAFE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(host) = var("VISIONSAFE_HOST") {
            self.server.bind_host = host;
        }
        if let Some(level) = var("VISIONSAFE_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(dir) = var("VISIONSAFE_DATA_DIR") {
            self.set_data_dir(dir);
        }
        if let Some(model) = var("VISIONSAFE_MODEL_PATH") {
            self.video.model_path = PathBuf::from(model);
        }
        if let Some(max) = var("VISIONSAFE_MAX_STRIKES").and_then(|v| v.parse::<u32>().ok()) {
            self.ledger.max_strikes = max;
        }
        if let Some(cooldown) = var("VISIONSAFE_COOLDOWN_SECS").and_then(|v| v.parse::<f64>().ok()) {
            self.ledger.cooldown_secs = cooldown;
        }
    }

    /// Root every on-disk location (store, evidence, uploads, output) under `dir`
    pub fn set_data_dir(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        self.storage.path = dir.join("violations");
        self.evidence.dir = dir.join("evidence_snaps");
        self.video.upload_dir = dir.join("uploads");
        self.video.processed_dir = dir.join("processed");
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.max_strikes == 0 {
            return Err(ConfigError::ValidationError("ledger.max_strikes must be > 0".to_string()));
        }
        if !self.ledger.cooldown_secs.is_finite() || self.ledger.cooldown_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "ledger.cooldown_secs must be a non-negative number".to_string(),
            ));
        }

        if self.association.person_class.trim().is_empty() {
            return Err(ConfigError::ValidationError("association.person_class cannot be empty".to_string()));
        }
        if self.association.required.is_empty() {
            return Err(ConfigError::ValidationError(
                "association.required must list at least one item".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.association.min_confidence) {
            return Err(ConfigError::ValidationError(
                "association.min_confidence must be within [0, 1]".to_string(),
            ));
        }
        match self.association.metric {
            OverlapMetric::CenterInside => {}
            OverlapMetric::Containment { min_fraction: t } | OverlapMetric::Iou { min_iou: t } => {
                if !(t > 0.0 && t <= 1.0) {
                    return Err(ConfigError::ValidationError(
                        "association.metric threshold must be within (0, 1]".to_string(),
                    ));
                }
            }
        }
        for zone in &self.association.zones {
            if !(0.0..=1.0).contains(&zone.top) || !(0.0..=1.0).contains(&zone.bottom) || zone.top >= zone.bottom {
                return Err(ConfigError::ValidationError(format!(
                    "zone for {} must satisfy 0 <= top < bottom <= 1",
                    zone.class
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.evidence.crop_padding) {
            return Err(ConfigError::ValidationError("evidence.crop_padding must be within [0, 1]".to_string()));
        }
        if self.evidence.jpeg_quality == 0 || self.evidence.jpeg_quality > 100 {
            return Err(ConfigError::ValidationError("evidence.jpeg_quality must be 1..=100".to_string()));
        }
        if self.evidence.write_attempts == 0 || self.storage.write_attempts == 0 {
            return Err(ConfigError::ValidationError("write_attempts must be > 0".to_string()));
        }

        if self.video.detection_stride == 0 {
            return Err(ConfigError::ValidationError("video.detection_stride must be > 0".to_string()));
        }
        if self.video.job_history == 0 {
            return Err(ConfigError::ValidationError("video.job_history must be > 0".to_string()));
        }
        if self.video.fourcc.chars().count() != 4 {
            return Err(ConfigError::ValidationError("video.fourcc must be four characters".to_string()));
        }
        if self.video.input_size == 0 || self.video.input_size % 32 != 0 {
            return Err(ConfigError::ValidationError(
                "video.input_size must be a positive multiple of 32".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port cannot be 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default_is_valid() {
        let config = VisionSafeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.max_strikes, 15);
        assert_eq!(config.ledger.cooldown(), chrono::Duration::seconds(5));
        assert_eq!(config.ledger.fired_policy, FiredPolicy::Record);
        assert_eq!(config.association.metric, OverlapMetric::CenterInside);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = VisionSafeConfig::parse_str(
            r#"
            [ledger]
            max_strikes = 3
            cooldown_secs = 2.5
            fired_policy = "suppress"

            [association]
            metric = { type = "iou", min_iou = 0.2 }
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.max_strikes, 3);
        assert_eq!(config.ledger.cooldown(), chrono::Duration::milliseconds(2500));
        assert_eq!(config.ledger.fired_policy, FiredPolicy::Suppress);
        assert_eq!(config.association.metric, OverlapMetric::Iou { min_iou: 0.2 });
        // untouched sections keep their defaults
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.association.person_class, "person");
    }

    #[test]
    fn test_parse_yaml() {
        let config = VisionSafeConfig::parse_str(
            "server:\n  port: 9001\nassociation:\n  metric:\n    type: containment\n    min_fraction: 0.6\n",
        )
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.association.metric, OverlapMetric::Containment { min_fraction: 0.6 });
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            VisionSafeConfig::parse_str("[[[ not a config"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("VISIONSAFE_PORT", "9100"),
            ("VISIONSAFE_MAX_STRIKES", "4"),
            ("VISIONSAFE_COOLDOWN_SECS", "1.5"),
            ("VISIONSAFE_DATA_DIR", "/tmp/vs"),
        ]
        .into_iter()
        .collect();
        let mut config = VisionSafeConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.ledger.max_strikes, 4);
        assert_eq!(config.ledger.cooldown_secs, 1.5);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/vs/violations"));
        assert_eq!(config.evidence.dir, PathBuf::from("/tmp/vs/evidence_snaps"));
        assert_eq!(config.video.processed_dir, PathBuf::from("/tmp/vs/processed"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = VisionSafeConfig::default();
        config.ledger.max_strikes = 0;
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.ledger.cooldown_secs = -1.0;
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.association.metric = OverlapMetric::Iou { min_iou: 0.0 };
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.association.zones.push(BodyZone::new("Vest", 0.7, 0.2));
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.video.detection_stride = 0;
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.video.fourcc = "VP8".to_string();
        assert!(config.validate().is_err());

        let mut config = VisionSafeConfig::default();
        config.video.job_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_required_equipment_alternatives() {
        let headgear = RequiredEquipment::with_alternatives("Headgear", &["Helmet", "Goggles"]);
        assert!(headgear.accepts("helmet"));
        assert!(headgear.accepts("Goggles"));
        assert!(headgear.accepts("HEADGEAR"));
        assert!(!headgear.accepts("Vest"));
    }
}
