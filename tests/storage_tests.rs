//! Filesystem store round trips: what a restarted gateway reads back.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use fable_gateway::ledger::{DailyUsageRecord, FsLedgerStore, LedgerStore, UsageLedger};
use fable_gateway::relay::TranscriptRole;
use fable_gateway::transcript::{
    ConversationRecord, FsTranscriptStore, SessionOutcome, TranscriptMessage, TranscriptStore,
};
use fable_gateway::DeviceId;

fn device_id(raw: &str) -> DeviceId {
    raw.parse().unwrap()
}

#[tokio::test]
async fn test_ledger_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");

    {
        let ledger = UsageLedger::load(3, chrono_tz::UTC, Arc::new(FsLedgerStore::new(&path)))
            .await
            .unwrap();
        assert!(ledger.try_consume(&device_id("ABCD1234")).await.allowed);
        assert!(ledger.try_consume(&device_id("ABCD1234")).await.allowed);
        ledger.record_session_time(&device_id("ABCD1234"), 90.0).await;
    }

    // A fresh ledger over the same file sees the consumed quota.
    let ledger = UsageLedger::load(3, chrono_tz::UTC, Arc::new(FsLedgerStore::new(&path)))
        .await
        .unwrap();
    assert_eq!(ledger.remaining(&device_id("ABCD1234")).await, 1);
    let summary = ledger.usage_summary(&device_id("ABCD1234"), 7).await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].episodes_played, 2);
    assert_eq!(summary[0].session_seconds, 90.0);
}

#[tokio::test]
async fn test_ledger_store_keeps_other_devices_intact() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsLedgerStore::new(dir.path().join("usage.json"));
    let date = NaiveDate::from_ymd_opt(2026, 8, 29).unwrap();

    let mut days = BTreeMap::new();
    days.insert(date, DailyUsageRecord::new(date));
    store.save_device(&device_id("ABCD1234"), &days).await.unwrap();
    store.save_device(&device_id("EFGH5678"), &days).await.unwrap();

    let all = store.load_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.contains_key(&device_id("ABCD1234")));
    assert!(all.contains_key(&device_id("EFGH5678")));
}

#[tokio::test]
async fn test_transcript_files_round_trip_and_filter() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsTranscriptStore::new(dir.path());

    let mut first = ConversationRecord::new(Uuid::new_v4(), device_id("ABCD1234"), 1, 1);
    first.messages.push(TranscriptMessage {
        sequence: 1,
        role: TranscriptRole::Device,
        payload: "what happens next?".into(),
        timestamp: Utc::now(),
    });
    first.ended_at = Some(Utc::now());
    first.outcome = Some(SessionOutcome::Completed);
    store.save(&first).await.unwrap();

    let second = ConversationRecord::new(Uuid::new_v4(), device_id("EFGH5678"), 1, 1);
    store.save(&second).await.unwrap();

    let loaded = store.load(first.session_id).await.unwrap().unwrap();
    assert_eq!(loaded.messages.len(), 1);
    assert_eq!(loaded.outcome, Some(SessionOutcome::Completed));

    // Listing is per device.
    let listed = store.list_for_device(&device_id("ABCD1234"), 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, first.session_id);

    assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
}
