//! Dashboard aggregation over the full record set.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use visionsafe_core::{TrackId, ViolationRecord};

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Items a fully equipped worker is assumed to wear when scoring recent scans
pub const STANDARD_PPE_ITEMS: usize = 5;
const LEADERBOARD_SIZE: usize = 5;
const CONFIDENCE_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_violations: usize,
    pub unique_workers: usize,
    pub critical_issue: String,
    pub status: String,
}

/// One row of `/logs` and `/recent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Violation")]
    pub violation: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Evidence")]
    pub evidence: Option<String>,
    #[serde(rename = "Strikes")]
    pub strikes: u32,
}

impl From<&ViolationRecord> for LogEntry {
    fn from(record: &ViolationRecord) -> Self {
        Self {
            id: record.worker_id.label(),
            violation: record.violation_text(),
            time: record.timestamp.format(TIME_FORMAT).to_string(),
            evidence: record.evidence_file_name(),
            strikes: record.strike_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub violations: usize,
    pub stars: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceEntry {
    pub worker_id: String,
    pub time: String,
    pub score: u32,
    pub status: String,
    pub missing_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStats {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub recent_confidence: Vec<ConfidenceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_violations: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Keyed by UTC hour of day
    pub by_hour: BTreeMap<u32, usize>,
}

pub fn dashboard_stats(records: &[ViolationRecord]) -> DashboardStats {
    let unique: HashSet<TrackId> = records.iter().map(|r| r.worker_id).collect();
    DashboardStats {
        total_violations: records.len(),
        unique_workers: unique.len(),
        critical_issue: critical_issue(records).unwrap_or_else(|| "None".to_string()),
        status: if records.is_empty() { "ready" } else { "live" }.to_string(),
    }
}

/// Most frequent missing item; ties go to the lexicographically smallest.
pub fn critical_issue(records: &[ViolationRecord]) -> Option<String> {
    let counts = item_counts(records);
    let mut best: Option<(&String, usize)> = None;
    for (item, count) in &counts {
        if best.map_or(true, |(_, best_count)| *count > best_count) {
            best = Some((item, *count));
        }
    }
    best.map(|(item, _)| item.clone())
}

fn item_counts(records: &[ViolationRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in records.iter().flat_map(|r| r.missing_items.iter()) {
        *counts.entry(item.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Star rating: 5.0 minus 0.5 per violation, never below 1.0.
pub fn star_rating(violations: usize) -> f64 {
    (5.0 - 0.5 * violations as f64).max(1.0)
}

pub fn report_stats(records: &[ViolationRecord]) -> ReportStats {
    let mut per_worker: BTreeMap<TrackId, usize> = BTreeMap::new();
    for record in records {
        *per_worker.entry(record.worker_id).or_insert(0) += 1;
    }

    let mut leaderboard: Vec<(TrackId, usize)> = per_worker.into_iter().collect();
    // fewest violations first, then by worker id
    leaderboard.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    let leaderboard = leaderboard
        .into_iter()
        .take(LEADERBOARD_SIZE)
        .map(|(id, violations)| LeaderboardEntry {
            id: id.label(),
            violations,
            stars: star_rating(violations),
        })
        .collect();

    let recent_confidence = records
        .iter()
        .rev()
        .take(CONFIDENCE_WINDOW)
        .map(|record| {
            let missing_count = record.missing_items.len();
            let worn = STANDARD_PPE_ITEMS.saturating_sub(missing_count);
            let score = (worn * 100 / STANDARD_PPE_ITEMS) as u32;
            ConfidenceEntry {
                worker_id: record.worker_id.label(),
                time: record.timestamp.format(TIME_FORMAT).to_string(),
                score,
                status: if score < 50 {
                    "Advisory Alert (High Risk)"
                } else {
                    "Standard Alert"
                }
                .to_string(),
                missing_count,
            }
        })
        .collect();

    ReportStats {
        leaderboard,
        recent_confidence,
    }
}

pub fn analytics(records: &[ViolationRecord]) -> Analytics {
    use chrono::Timelike;

    let mut by_hour = BTreeMap::new();
    for record in records {
        *by_hour.entry(record.timestamp.hour()).or_insert(0) += 1;
    }
    Analytics {
        total_violations: records.len(),
        by_type: item_counts(records),
        by_hour,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;
    use visionsafe_core::{EquipmentClass, ViolationKind};

    fn record(worker: u64, items: &[&str], minutes: i64) -> ViolationRecord {
        ViolationRecord {
            worker_id: TrackId(worker),
            missing_items: items.iter().map(|i| EquipmentClass::new(*i)).collect(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minutes),
            strike_count: 1,
            evidence_path: None,
            kind: ViolationKind::Strike,
        }
    }

    #[test]
    fn test_empty_stats() {
        let stats = dashboard_stats(&[]);
        assert_eq!(stats.total_violations, 0);
        assert_eq!(stats.unique_workers, 0);
        assert_eq!(stats.critical_issue, "None");
        assert_eq!(stats.status, "ready");
    }

    #[test]
    fn test_critical_issue_tie_breaks_lexicographically() {
        let records = vec![record(1, &["Vest"], 0), record(2, &["Gloves"], 1)];
        assert_eq!(critical_issue(&records).as_deref(), Some("Gloves"));

        let records = vec![
            record(1, &["Vest", "Gloves"], 0),
            record(2, &["Vest"], 1),
        ];
        assert_eq!(critical_issue(&records).as_deref(), Some("Vest"));
    }

    #[test]
    fn test_log_entry_shape() {
        let mut r = record(3, &["Vest", "Shoes"], 5);
        r.strike_count = 2;
        r.evidence_path = Some(PathBuf::from("evidence_snaps/Worker3_20240501-080500-000.png"));
        let json = serde_json::to_value(LogEntry::from(&r)).unwrap();
        assert_eq!(json["ID"], "Worker-3");
        assert_eq!(json["Violation"], "Vest, Shoes");
        assert_eq!(json["Time"], "2024-05-01 08:05:00");
        assert_eq!(json["Evidence"], "Worker3_20240501-080500-000.png");
        assert_eq!(json["Strikes"], 2);

        let json = serde_json::to_value(LogEntry::from(&record(1, &["Vest"], 0))).unwrap();
        assert!(json["Evidence"].is_null());
    }

    #[test]
    fn test_star_rating_floor() {
        assert_eq!(star_rating(0), 5.0);
        assert_eq!(star_rating(3), 3.5);
        assert_eq!(star_rating(8), 1.0);
        assert_eq!(star_rating(20), 1.0);
    }

    #[test]
    fn test_report_stats() {
        let mut records = Vec::new();
        for worker in 1..=7u64 {
            for i in 0..worker {
                records.push(record(worker, &["Vest"], i as i64));
            }
        }
        records.push(record(9, &["Vest", "Gloves", "Shoes"], 120));

        let report = report_stats(&records);
        assert_eq!(report.leaderboard.len(), 5);
        assert_eq!(report.leaderboard[0].id, "Worker-1");
        assert_eq!(report.leaderboard[0].stars, 4.5);
        assert_eq!(report.leaderboard[1].id, "Worker-9");
        assert!(report
            .leaderboard
            .windows(2)
            .all(|w| w[0].stars >= w[1].stars));

        assert_eq!(report.recent_confidence.len(), 10);
        let newest = &report.recent_confidence[0];
        assert_eq!(newest.worker_id, "Worker-9");
        assert_eq!(newest.missing_count, 3);
        assert_eq!(newest.score, 40);
        assert_eq!(newest.status, "Advisory Alert (High Risk)");
        assert_eq!(report.recent_confidence[1].score, 80);
        assert_eq!(report.recent_confidence[1].status, "Standard Alert");
    }

    #[test]
    fn test_analytics() {
        let records = vec![
            record(1, &["Vest", "Gloves"], 0),
            record(2, &["Vest"], 30),
            record(2, &["Shoes"], 90),
        ];
        let analytics = analytics(&records);
        assert_eq!(analytics.total_violations, 3);
        assert_eq!(analytics.by_type.get("Vest"), Some(&2));
        assert_eq!(analytics.by_type.get("Gloves"), Some(&1));
        assert_eq!(analytics.by_hour.get(&8), Some(&2));
        assert_eq!(analytics.by_hour.get(&9), Some(&1));
    }
}
