mod common;

use chrono::Duration;
use common::{base_time, record};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use visionsafe_core::{
    AssociationConfig, BoundingBox, Detection, EvidenceConfig, FiredPolicy, LedgerConfig,
    PpeAssociator, RequiredEquipment, StrikeLedger, TrackId, ViolationKind, WorkerState,
};
use visionsafe_eye::{EvidenceCapturer, FramePipeline, Metrics};
use visionsafe_storage::{dashboard_stats, PersistenceWriter, SledViolationStore, ViolationStore};

fn helmet_only() -> AssociationConfig {
    AssociationConfig {
        required: vec![RequiredEquipment::new("Helmet")],
        zones: Vec::new(),
        ..AssociationConfig::default()
    }
}

fn gradient_frame() -> RgbImage {
    RgbImage::from_fn(96, 72, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 251) as u8]))
}

#[test]
fn test_strike_scenario_persists_through_sled() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("violations");
    let ledger = Arc::new(StrikeLedger::new(LedgerConfig {
        max_strikes: 3,
        cooldown_secs: 5.0,
        fired_policy: FiredPolicy::Record,
        require_new_signature: false,
    }));

    {
        let store: Arc<dyn ViolationStore> = Arc::new(SledViolationStore::open(&db_path).unwrap());
        let evidence = Arc::new(
            EvidenceCapturer::new(EvidenceConfig {
                dir: dir.path().join("evidence"),
                ..EvidenceConfig::default()
            })
            .unwrap(),
        );
        let pipeline = FramePipeline::new(
            PpeAssociator::new(helmet_only()),
            ledger.clone(),
            evidence,
            PersistenceWriter::new(store.clone(), 3, StdDuration::from_millis(1)),
            Arc::new(Metrics::new()),
        );

        let frame = gradient_frame();
        let person = Detection::new(Some(TrackId(5)), "person", BoundingBox::new(10.0, 10.0, 30.0, 50.0), 0.9);
        for t in [0, 2, 4, 6, 11, 16] {
            pipeline
                .process(&frame, &[person.clone()], base_time() + Duration::seconds(t))
                .unwrap();
        }
        store.flush().unwrap();
    }

    let worker = ledger.get(TrackId(5)).unwrap();
    assert_eq!(worker.strike_count, 3);
    assert!(worker.fired);
    assert_eq!(ledger.status(TrackId(5)).state, WorkerState::Fired);

    // reopen to make sure everything reached disk
    let store = SledViolationStore::open(&db_path).unwrap();
    let records = store.all().unwrap();
    let offsets: Vec<i64> = records.iter().map(|r| (r.timestamp - base_time()).num_seconds()).collect();
    assert_eq!(offsets, vec![0, 6, 11, 16]);
    let kinds: Vec<ViolationKind> = records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ViolationKind::Strike,
            ViolationKind::Strike,
            ViolationKind::Strike,
            ViolationKind::Informational
        ]
    );
    assert_eq!(records[3].strike_count, 3);
    assert!(records[..3].iter().all(|r| r.evidence_path.is_some()));
    assert!(records[3].evidence_path.is_none());

    let stats = dashboard_stats(&records);
    assert_eq!(stats.total_violations, 4);
    assert_eq!(stats.unique_workers, 1);
    assert_eq!(stats.critical_issue, "Helmet");
}

#[test]
fn test_evidence_round_trip_matches_frame_region() {
    let dir = tempfile::tempdir().unwrap();
    let capturer = EvidenceCapturer::new(EvidenceConfig {
        dir: dir.path().to_path_buf(),
        crop_padding: 0.0,
        ..EvidenceConfig::default()
    })
    .unwrap();

    let frame = gradient_frame();
    let bbox = BoundingBox::new(12.0, 8.0, 40.0, 30.0);
    let path = capturer.capture(&frame, &bbox, TrackId(3), base_time()).unwrap();

    let decoded = image::open(&path).unwrap().to_rgb8();
    let expected = image::imageops::crop_imm(&frame, 12, 8, 40, 30).to_image();
    assert_eq!(decoded.dimensions(), (40, 30));
    assert_eq!(decoded, expected);
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("Worker3_20240501-080000-000"));
}

#[test]
fn test_sled_store_statistics_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let store = SledViolationStore::open(&path).unwrap();
        for i in 0..10 {
            store.append(&record(i % 3, &["Vest"], i as i64)).unwrap();
        }
        store.flush().unwrap();
    }
    let store = SledViolationStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 10);
    let recent = store.recent(3).unwrap();
    assert_eq!(
        recent.iter().map(|r| r.worker_id).collect::<Vec<_>>(),
        vec![TrackId(0), TrackId(2), TrackId(1)]
    );
    let stats = dashboard_stats(&store.all().unwrap());
    assert_eq!(stats.unique_workers, 3);
    assert_eq!(stats.critical_issue, "Vest");
}
