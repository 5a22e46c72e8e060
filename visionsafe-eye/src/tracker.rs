//! Multi-object tracking

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use visionsafe_core::{BoundingBox, Detection, TrackId};

/// Limit on live tracks; the stalest tenth is evicted when reached
const MAX_TRACKS: usize = 1000;

/// Tracked object with ID
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: TrackId,
    pub bbox: BoundingBox,
    /// Frames since last matched
    pub age: u32,
}

/// Hands out track ids; trackers sharing one never reuse each other's ids.
#[derive(Debug, Clone)]
pub struct TrackIdAllocator {
    next: Arc<AtomicU64>,
}

impl TrackIdAllocator {
    /// Ids start at `first` (0 is never handed out).
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first.max(1))),
        }
    }

    pub fn next_id(&self) -> TrackId {
        TrackId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next call to `next_id` returns.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for TrackIdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Greedy IoU tracker assigning stable ids across frames of one stream
pub struct ObjectTracker {
    ids: TrackIdAllocator,
    tracks: RwLock<HashMap<u64, TrackedObject>>,
    max_age: u32,
    iou_threshold: f32,
}

impl ObjectTracker {
    pub fn new(max_age: u32, iou_threshold: f32) -> Self {
        Self::with_ids(max_age, iou_threshold, TrackIdAllocator::default())
    }

    /// Tracker drawing new ids from a shared allocator.
    pub fn with_ids(max_age: u32, iou_threshold: f32, ids: TrackIdAllocator) -> Self {
        Self {
            ids,
            tracks: RwLock::new(HashMap::new()),
            max_age,
            iou_threshold,
        }
    }

    /// Assign a track id to every detection, in input order.
    pub fn update(&self, boxes: &[BoundingBox]) -> Vec<Option<TrackId>> {
        let mut tracks = self.tracks.write();

        for track in tracks.values_mut() {
            track.age += 1;
        }

        let mut assigned: Vec<Option<TrackId>> = vec![None; boxes.len()];
        let mut claimed: HashSet<u64> = HashSet::new();

        for (det_idx, bbox) in boxes.iter().enumerate() {
            let mut best_match: Option<(u64, f32)> = None;

            for (track_id, track) in tracks.iter() {
                if track.age > self.max_age || claimed.contains(track_id) {
                    continue;
                }
                let iou = bbox.iou(&track.bbox);
                if iou > self.iou_threshold && best_match.map_or(true, |(_, best)| iou > best) {
                    best_match = Some((*track_id, iou));
                }
            }

            if let Some((track_id, _)) = best_match {
                if let Some(track) = tracks.get_mut(&track_id) {
                    track.bbox = *bbox;
                    track.age = 0;
                    claimed.insert(track_id);
                    assigned[det_idx] = Some(TrackId(track_id));
                }
            }
        }

        if tracks.len() >= MAX_TRACKS {
            let mut by_age: Vec<(u64, u32)> = tracks.iter().map(|(id, t)| (*id, t.age)).collect();
            by_age.sort_by(|a, b| b.1.cmp(&a.1));
            for (id, _) in by_age.iter().take((MAX_TRACKS / 10).max(1)) {
                tracks.remove(id);
            }
        }

        for (det_idx, bbox) in boxes.iter().enumerate() {
            if assigned[det_idx].is_some() {
                continue;
            }

            let id = self.ids.next_id();
            tracks.insert(
                id.0,
                TrackedObject {
                    id,
                    bbox: *bbox,
                    age: 0,
                },
            );
            assigned[det_idx] = Some(id);
        }

        tracks.retain(|_, track| track.age <= self.max_age);
        debug!("Tracking {} objects", tracks.len());
        assigned
    }

    pub fn tracks(&self) -> Vec<TrackedObject> {
        let mut tracks: Vec<TrackedObject> = self.tracks.read().values().cloned().collect();
        tracks.sort_by_key(|t| t.id);
        tracks
    }
}

/// Attach tracker ids to the detections of one class.
pub fn assign_ids(tracker: &ObjectTracker, detections: &mut [Detection], class: &str) {
    let indices: Vec<usize> = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.class.trim().eq_ignore_ascii_case(class.trim()))
        .map(|(i, _)| i)
        .collect();
    let boxes: Vec<BoundingBox> = indices.iter().map(|i| detections[*i].bbox).collect();
    let ids = tracker.update(&boxes);
    for (idx, id) in indices.into_iter().zip(ids) {
        detections[idx].track_id = id;
    }
}
