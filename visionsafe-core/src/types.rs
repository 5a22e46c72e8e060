//! Core value types shared by every VisionSafe crate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CoreError;

/// Stable identity assigned by the tracker to one physical person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl TrackId {
    /// Human-facing worker label, e.g. `Worker-7`.
    pub fn label(&self) -> String {
        format!("Worker-{}", self.0)
    }
}

/// Accepts either the bare number or the `Worker-N` label.
impl FromStr for TrackId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        s.strip_prefix("Worker-")
            .unwrap_or(s)
            .parse::<u64>()
            .map(TrackId)
            .map_err(|_| CoreError::InvalidWorkerId(s.to_string()))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Equipment class label as produced by the detector ("Helmet", "Vest", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EquipmentClass(pub String);

impl EquipmentClass {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Detector labels are matched case-insensitively.
    pub fn matches(&self, label: &str) -> bool {
        self.0.trim().eq_ignore_ascii_case(label.trim())
    }
}

impl fmt::Display for EquipmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EquipmentClass {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

/// Axis-aligned box in pixel coordinates, `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates `[x1, y1, x2, y2]`.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Finite coordinates and strictly positive size.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn contains_point(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        if !self.is_valid() || !other.is_valid() {
            return 0.0;
        }
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return 0.0;
        }
        (right - left) * (bottom - top)
    }

    /// Intersection over union, 0.0 for degenerate or non-finite boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        let iou = inter / union;
        if iou.is_finite() && (0.0..=1.0).contains(&iou) {
            iou
        } else {
            0.0
        }
    }

    /// Clamp to an image of the given size; `None` if nothing remains.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<BoundingBox> {
        if !self.is_valid() {
            return None;
        }
        let x1 = self.x.max(0.0).min(image_width as f32);
        let y1 = self.y.max(0.0).min(image_height as f32);
        let x2 = self.right().max(0.0).min(image_width as f32);
        let y2 = self.bottom().max(0.0).min(image_height as f32);
        let clamped = BoundingBox::from_corners(x1, y1, x2, y2);
        if clamped.width >= 1.0 && clamped.height >= 1.0 {
            Some(clamped)
        } else {
            None
        }
    }

    /// Grow by a fraction of the box size on every side.
    pub fn padded(&self, fraction: f32) -> BoundingBox {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        BoundingBox::new(self.x - dx, self.y - dy, self.width + 2.0 * dx, self.height + 2.0 * dy)
    }
}

/// One detector output for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `None` when the tracker lost this object.
    pub track_id: Option<TrackId>,
    pub class: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Detection {
    pub fn new(track_id: Option<TrackId>, class: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id,
            class: class.into(),
            bbox,
            confidence,
        }
    }
}

/// Disciplinary state derived from the strike count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Clean,
    Warned,
    Fired,
}

impl WorkerState {
    pub fn from_strikes(strike_count: u32, max_strikes: u32) -> Self {
        if strike_count == 0 {
            WorkerState::Clean
        } else if strike_count >= max_strikes {
            WorkerState::Fired
        } else {
            WorkerState::Warned
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub strike_count: u32,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Clean,
            strike_count: 0,
        }
    }
}

/// Ledger entry for one tracked person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub track_id: TrackId,
    /// Items missing on the most recent sighting.
    pub missing_items: Vec<EquipmentClass>,
    pub strike_count: u32,
    pub last_strike_at: Option<DateTime<Utc>>,
    pub fired: bool,
    /// Sorted missing set of the last counted strike; cleared once compliant.
    pub last_violation: Vec<EquipmentClass>,
    pub last_informational_at: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(track_id: TrackId) -> Self {
        Self {
            track_id,
            missing_items: Vec::new(),
            strike_count: 0,
            last_strike_at: None,
            fired: false,
            last_violation: Vec::new(),
            last_informational_at: None,
        }
    }

    pub fn status(&self, max_strikes: u32) -> WorkerStatus {
        let state = if self.fired {
            WorkerState::Fired
        } else {
            WorkerState::from_strikes(self.strike_count, max_strikes)
        };
        WorkerStatus {
            state,
            strike_count: self.strike_count,
        }
    }
}

/// Whether a record counted toward the strike total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    #[default]
    Strike,
    /// Logged for audit after the worker was already fired.
    Informational,
}

/// Durable unit exposed to dashboards and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub worker_id: TrackId,
    pub missing_items: Vec<EquipmentClass>,
    pub timestamp: DateTime<Utc>,
    pub strike_count: u32,
    pub evidence_path: Option<PathBuf>,
    #[serde(default)]
    pub kind: ViolationKind,
}

impl ViolationRecord {
    /// Missing items joined the way the dashboards display them.
    pub fn violation_text(&self) -> String {
        self.missing_items
            .iter()
            .map(|item| item.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Last path segment of the evidence file, as served by `/evidence/{filename}`.
    pub fn evidence_file_name(&self) -> Option<String> {
        self.evidence_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}
