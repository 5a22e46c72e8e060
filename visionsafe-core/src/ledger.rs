//! Strike ledger: cumulative strikes, cooldowns and termination per worker.

use crate::config::{FiredPolicy, LedgerConfig};
use crate::evaluation::signature;
use crate::types::{EquipmentClass, TrackId, ViolationKind, Worker, WorkerStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

/// Result of presenting a candidate violation to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeOutcome {
    pub strike_applied: bool,
    /// This strike moved the worker to `Fired`
    pub newly_fired: bool,
    pub status: WorkerStatus,
    /// Which record, if any, should be persisted for this candidate
    pub record: Option<ViolationKind>,
}

/// Keyed worker store. Writers are serialized per worker by the map's shard locks.
pub struct StrikeLedger {
    workers: DashMap<TrackId, Worker>,
    config: LedgerConfig,
}

impl StrikeLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            workers: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Apply a strike unless the worker is inside the cooldown window or already fired.
    pub fn register_candidate(&self, track_id: TrackId, missing: &[EquipmentClass], now: DateTime<Utc>) -> StrikeOutcome {
        let cooldown = self.config.cooldown();
        let max_strikes = self.config.max_strikes;

        let mut worker = self.workers.entry(track_id).or_insert_with(|| Worker::new(track_id));
        worker.missing_items = missing.to_vec();

        if worker.fired {
            let due = worker
                .last_informational_at
                .map_or(true, |last| now.signed_duration_since(last) >= cooldown);
            let record = if self.config.fired_policy == FiredPolicy::Record && due {
                worker.last_informational_at = Some(now);
                Some(ViolationKind::Informational)
            } else {
                None
            };
            return StrikeOutcome {
                strike_applied: false,
                newly_fired: false,
                status: worker.status(max_strikes),
                record,
            };
        }

        // negative elapsed time (out-of-order input) counts as inside the window
        let outside_cooldown = worker
            .last_strike_at
            .map_or(true, |last| now.signed_duration_since(last) >= cooldown);
        if !outside_cooldown {
            debug!("Worker {} inside cooldown, candidate dropped", track_id);
            return StrikeOutcome {
                strike_applied: false,
                newly_fired: false,
                status: worker.status(max_strikes),
                record: None,
            };
        }

        worker.strike_count += 1;
        worker.last_strike_at = Some(now);
        worker.last_violation = signature(missing);

        let newly_fired = worker.strike_count >= max_strikes;
        if newly_fired {
            worker.fired = true;
            warn!(
                "Worker {} fired after {} strikes",
                track_id.label(),
                worker.strike_count
            );
        } else {
            info!(
                "Strike {}/{} for {}",
                worker.strike_count,
                max_strikes,
                track_id.label()
            );
        }

        StrikeOutcome {
            strike_applied: true,
            newly_fired,
            status: worker.status(max_strikes),
            record: Some(ViolationKind::Strike),
        }
    }

    /// Record the latest sighting; a compliant sighting clears the violation signature.
    pub fn observe(&self, track_id: TrackId, missing: &[EquipmentClass]) -> WorkerStatus {
        let mut worker = self.workers.entry(track_id).or_insert_with(|| Worker::new(track_id));
        worker.missing_items = missing.to_vec();
        if missing.is_empty() {
            worker.last_violation.clear();
        }
        worker.status(self.config.max_strikes)
    }

    /// Current status; unknown workers are `Clean`.
    pub fn status(&self, track_id: TrackId) -> WorkerStatus {
        self.workers
            .get(&track_id)
            .map(|w| w.status(self.config.max_strikes))
            .unwrap_or_default()
    }

    pub fn get(&self, track_id: TrackId) -> Option<Worker> {
        self.workers.get(&track_id).map(|w| w.clone())
    }

    /// All known workers ordered by id.
    pub fn snapshot(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self.workers.iter().map(|entry| entry.value().clone()).collect();
        workers.sort_by_key(|w| w.track_id);
        workers
    }

    pub fn reset(&self, track_id: TrackId) -> bool {
        let removed = self.workers.remove(&track_id).is_some();
        if removed {
            info!("Ledger entry reset for {}", track_id.label());
        }
        removed
    }

    pub fn reset_all(&self) {
        let count = self.workers.len();
        self.workers.clear();
        info!("Ledger cleared ({} workers)", count);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
