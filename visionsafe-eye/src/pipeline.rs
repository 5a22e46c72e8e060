//! Per-frame pipeline: associate, evaluate, apply strikes, capture, persist.

use crate::annotate::{overlay_for, Overlay};
use crate::error::Result;
use crate::evidence::EvidenceCapturer;
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::Arc;
use tracing::warn;
use visionsafe_core::{
    Detection, PpeAssociator, StrikeLedger, ViolationEvaluator, ViolationKind, ViolationRecord,
};
use visionsafe_storage::PersistenceWriter;

/// What one frame produced
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub overlays: Vec<Overlay>,
    pub records: Vec<ViolationRecord>,
    pub strikes_applied: u32,
}

/// Shared by every stream; the ledger is the only mutable state.
pub struct FramePipeline {
    associator: PpeAssociator,
    evaluator: ViolationEvaluator,
    ledger: Arc<StrikeLedger>,
    evidence: Arc<EvidenceCapturer>,
    writer: PersistenceWriter,
    metrics: Arc<Metrics>,
}

impl FramePipeline {
    pub fn new(
        associator: PpeAssociator,
        ledger: Arc<StrikeLedger>,
        evidence: Arc<EvidenceCapturer>,
        writer: PersistenceWriter,
        metrics: Arc<Metrics>,
    ) -> Self {
        let evaluator = ViolationEvaluator::new(ledger.config().require_new_signature);
        Self {
            associator,
            evaluator,
            ledger,
            evidence,
            writer,
            metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<StrikeLedger> {
        &self.ledger
    }

    /// Run one frame's detections through the engine.
    ///
    /// Evidence failures are logged and the record is kept without a path;
    /// persistence failures (after the writer's retries) are returned.
    pub fn process(&self, frame: &RgbImage, detections: &[Detection], now: DateTime<Utc>) -> Result<FrameReport> {
        let mut report = FrameReport::default();
        let max_strikes = self.ledger.config().max_strikes;

        for assessment in self.associator.assess(detections) {
            let Some(track_id) = assessment.track_id else {
                report
                    .overlays
                    .push(overlay_for(&assessment, Default::default(), max_strikes));
                continue;
            };

            self.ledger.observe(track_id, &assessment.missing);
            let worker = self.ledger.get(track_id);

            if let Some(candidate) = self.evaluator.evaluate(&assessment, worker.as_ref()) {
                let outcome = self.ledger.register_candidate(candidate.track_id, &candidate.missing, now);

                if let Some(kind) = outcome.record {
                    let evidence_path = if kind == ViolationKind::Strike {
                        self.metrics.record_strike();
                        report.strikes_applied += 1;
                        match self.evidence.capture(frame, &assessment.bbox, track_id, now) {
                            Ok(path) => Some(path),
                            Err(e) => {
                                warn!("Evidence capture failed for {}: {}", track_id.label(), e);
                                self.metrics.record_evidence_failure();
                                None
                            }
                        }
                    } else {
                        None
                    };

                    let record = ViolationRecord {
                        worker_id: track_id,
                        missing_items: candidate.missing.clone(),
                        timestamp: now,
                        strike_count: outcome.status.strike_count,
                        evidence_path,
                        kind,
                    };
                    self.writer.write(&record)?;
                    self.metrics.record_violation_record();
                    report.records.push(record);
                }
            }

            report
                .overlays
                .push(overlay_for(&assessment, self.ledger.status(track_id), max_strikes));
        }

        Ok(report)
    }
}
