use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use visionsafe_core::{EquipmentClass, FiredPolicy, LedgerConfig, StrikeLedger, TrackId, ViolationKind, ViolationRecord};
use visionsafe_storage::{dashboard_stats, report_stats};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

fn ledger(max_strikes: u32, cooldown_secs: f64) -> StrikeLedger {
    StrikeLedger::new(LedgerConfig {
        max_strikes,
        cooldown_secs,
        fired_policy: FiredPolicy::Record,
        require_new_signature: false,
    })
}

fn items(mask: u8) -> Vec<EquipmentClass> {
    ["Helmet", "Vest", "Gloves", "Shoes"]
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, name)| EquipmentClass::new(*name))
        .collect()
}

proptest! {
    #[test]
    fn test_strikes_never_exceed_max_and_fired_is_sticky(
        gaps in prop::collection::vec(0i64..12_000, 1..80),
        max in 1u32..6,
    ) {
        let ledger = ledger(max, 5.0);
        let mut now = t0();
        let mut was_fired = false;
        for gap in gaps {
            now = now + Duration::milliseconds(gap);
            let outcome = ledger.register_candidate(TrackId(1), &items(1), now);
            prop_assert!(outcome.status.strike_count <= max);
            let worker = ledger.get(TrackId(1)).unwrap();
            if was_fired {
                prop_assert!(worker.fired);
                prop_assert!(!outcome.strike_applied);
            }
            was_fired = worker.fired;
        }
    }

    #[test]
    fn test_strikes_bounded_by_elapsed_time(
        gaps in prop::collection::vec(0i64..9_000, 1..80),
        cooldown_secs in 1u32..8,
    ) {
        let ledger = ledger(u32::MAX, cooldown_secs as f64);
        let mut now = t0();
        for gap in &gaps {
            now = now + Duration::milliseconds(*gap);
            ledger.register_candidate(TrackId(1), &items(1), now);
        }
        let elapsed_ms = (now - t0()).num_milliseconds();
        let cooldown_ms = cooldown_secs as i64 * 1000;
        let bound = (elapsed_ms + cooldown_ms - 1) / cooldown_ms + 1;
        prop_assert!((ledger.status(TrackId(1)).strike_count as i64) <= bound);
    }

    #[test]
    fn test_events_spaced_by_cooldown_all_count(count in 1usize..40, extra_ms in 0i64..3_000) {
        let ledger = ledger(u32::MAX, 5.0);
        for i in 0..count {
            let at = t0() + Duration::milliseconds(i as i64 * (5_000 + extra_ms));
            prop_assert!(ledger.register_candidate(TrackId(2), &items(3), at).strike_applied);
        }
        prop_assert_eq!(ledger.status(TrackId(2)).strike_count as usize, count);
    }

    #[test]
    fn test_replay_is_deterministic(
        events in prop::collection::vec((1u64..5, 0i64..4_000, 1u8..16), 1..100),
        max in 1u32..8,
    ) {
        let first = ledger(max, 3.0);
        let second = ledger(max, 3.0);
        let mut now = t0();
        let mut log = Vec::new();
        for (worker, gap, mask) in events {
            now = now + Duration::milliseconds(gap);
            log.push((TrackId(worker), items(mask), now));
        }

        let outcomes_a: Vec<_> = log.iter().map(|(id, missing, at)| first.register_candidate(*id, missing, *at)).collect();
        let outcomes_b: Vec<_> = log.iter().map(|(id, missing, at)| second.register_candidate(*id, missing, *at)).collect();

        prop_assert_eq!(outcomes_a, outcomes_b);
        prop_assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_dashboard_totals(workers in prop::collection::vec((1u64..20, 1u8..16), 0..120)) {
        let records: Vec<ViolationRecord> = workers
            .iter()
            .enumerate()
            .map(|(i, (worker, mask))| ViolationRecord {
                worker_id: TrackId(*worker),
                missing_items: items(*mask),
                timestamp: t0() + Duration::seconds(i as i64),
                strike_count: 1,
                evidence_path: None,
                kind: ViolationKind::Strike,
            })
            .collect();

        let stats = dashboard_stats(&records);
        prop_assert_eq!(stats.total_violations, records.len());
        prop_assert!(stats.unique_workers <= records.len().max(1));
        prop_assert_eq!(stats.status == "live", !records.is_empty());

        let report = report_stats(&records);
        prop_assert!(report.leaderboard.len() <= 5);
        prop_assert!(report.recent_confidence.len() <= 10);
        prop_assert!(report.leaderboard.iter().all(|e| e.stars >= 1.0 && e.stars <= 5.0));
        prop_assert!(report.recent_confidence.iter().all(|e| e.score <= 100));
    }
}
