//! Violation evaluation: turns a person assessment into a strike candidate.

use crate::association::PersonAssessment;
use crate::types::{EquipmentClass, TrackId, Worker};

/// A violation worth presenting to the strike ledger
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateViolation {
    pub track_id: TrackId,
    pub missing: Vec<EquipmentClass>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ViolationEvaluator {
    require_new_signature: bool,
}

impl ViolationEvaluator {
    pub fn new(require_new_signature: bool) -> Self {
        Self { require_new_signature }
    }

    /// Stateless: the caller passes the worker's current ledger entry, if any.
    pub fn evaluate(&self, assessment: &PersonAssessment, worker: Option<&Worker>) -> Option<CandidateViolation> {
        let track_id = assessment.track_id?;
        if assessment.missing.is_empty() {
            return None;
        }

        if self.require_new_signature {
            if let Some(worker) = worker {
                if !worker.last_violation.is_empty() && worker.last_violation == signature(&assessment.missing) {
                    return None;
                }
            }
        }

        Some(CandidateViolation {
            track_id,
            missing: assessment.missing.clone(),
        })
    }
}

/// Order-independent form of a missing set.
pub fn signature(missing: &[EquipmentClass]) -> Vec<EquipmentClass> {
    let mut sig = missing.to_vec();
    sig.sort();
    sig.dedup();
    sig
}
