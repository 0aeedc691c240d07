//! Integration tests for the SQLite archive.
//!
//! Uses tempfile::TempDir for isolated database files.

use anima_core::{EmotionalState, EventKind, RawEvent};
use anima_memory::{ConsolidationScheduler, EpisodicLog, EventIntake, SqliteArchive};
use serde_json::json;

#[tokio::test]
async fn test_archive_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("anima.db");

    let log = EpisodicLog::new();
    let mut intake = EventIntake::new(Default::default(), log.clone());
    let mut sched = ConsolidationScheduler::new(Default::default(), Default::default());

    {
        let archive = SqliteArchive::open(&db_path).await.unwrap();
        for i in 0..8u64 {
            let raw = RawEvent::new(format!("e{}", i), "world", i + 1, EventKind::Outcome)
                .with_payload(json!({"ok": true}))
                .with_novelty(0.1);
            let record = intake.ingest(raw).unwrap();
            archive.append_event(&record).await.unwrap();

            let state = EmotionalState {
                cycle: record.cycle,
                ..Default::default()
            };
            if let Some(batch) = sched.maybe_consolidate(&log, &state, 0, record.cycle).unwrap() {
                let semantic = sched
                    .semantic_records()
                    .iter()
                    .find(|s| s.id == batch.resulting_semantic_id)
                    .unwrap();
                archive.append_batch(&batch, semantic).await.unwrap();
            }
            archive.record_state(&state).await.unwrap();
        }
    }

    let archive = SqliteArchive::open(&db_path).await.unwrap();
    let events = archive.load_events().await.unwrap();
    assert_eq!(events.len(), 8);
    assert_eq!(events[0].id, "e0");
    assert_eq!(events[7].cycle, 8);

    let batches = archive.load_batches().await.unwrap();
    assert_eq!(batches.len(), sched.batches().len());
    assert!(!batches.is_empty());
    assert_eq!(batches[0].source_event_ids.len(), 5);

    let counts = archive.counts().await.unwrap();
    assert_eq!(counts.events, 8);
    assert_eq!(counts.states, 8);
    assert_eq!(archive.latest_state().await.unwrap().unwrap().cycle, 8);
}
