//! End-to-end session scenarios over in-memory stores and a channel-backed
//! backend connector.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fable_gateway::backend::ChannelConnector;
use fable_gateway::error::SessionError;
use fable_gateway::ledger::{MemoryLedgerStore, UsageLedger};
use fable_gateway::profile::{MemoryProfileStore, Profile, ProfileStatus, Profiles};
use fable_gateway::prompt::MemoryPromptResolver;
use fable_gateway::registry::DeviceSessionRegistry;
use fable_gateway::relay::{channel_duplex, ControlFrame, Duplex, Frame, TranscriptRole};
use fable_gateway::session::{SessionLifecycle, SessionReport, SessionStatus, SignalOrCleanClose};
use fable_gateway::transcript::{MemoryTranscriptStore, RecorderConfig, SessionOutcome, TranscriptStore};
use fable_gateway::DeviceId;

const DAILY_LIMIT: u32 = 3;

struct Harness {
    lifecycle: Arc<SessionLifecycle>,
    registry: Arc<DeviceSessionRegistry>,
    ledger: Arc<UsageLedger>,
    profiles: Arc<Profiles>,
    prompts: Arc<MemoryPromptResolver>,
    transcripts: Arc<MemoryTranscriptStore>,
    connector: Arc<ChannelConnector>,
    backends: mpsc::UnboundedReceiver<Duplex>,
}

async fn harness() -> Harness {
    let registry = Arc::new(DeviceSessionRegistry::new());
    let ledger = Arc::new(
        UsageLedger::load(DAILY_LIMIT, chrono_tz::UTC, Arc::new(MemoryLedgerStore::new()))
            .await
            .unwrap(),
    );
    let profiles = Arc::new(Profiles::new(Arc::new(MemoryProfileStore::new()), 7, 10));
    let prompts = Arc::new(MemoryPromptResolver::new());
    let transcripts = Arc::new(MemoryTranscriptStore::new());
    let (connector, backends) = ChannelConnector::new();

    let lifecycle = Arc::new(SessionLifecycle::new(
        Arc::clone(&registry),
        Arc::clone(&ledger),
        Arc::clone(&profiles),
        Arc::clone(&prompts) as _,
        Arc::clone(&connector) as _,
        Arc::clone(&transcripts) as Arc<dyn TranscriptStore>,
        RecorderConfig {
            buffer_cap: 64,
            flush_every: 5,
        },
        Duration::from_secs(30),
        Arc::new(SignalOrCleanClose),
    ));

    Harness {
        lifecycle,
        registry,
        ledger,
        profiles,
        prompts,
        transcripts,
        connector,
        backends,
    }
}

fn device_id(raw: &str) -> DeviceId {
    raw.parse().unwrap()
}

async fn seed_device(h: &Harness, id: &str, season: u32, episode: u32) {
    h.profiles
        .upsert(
            &device_id(id),
            Profile {
                name: "Listener".into(),
                age: 6,
                status: ProfileStatus::Active,
                season,
                episode,
                episodes_completed: 0,
            },
        )
        .await
        .unwrap();
    h.prompts.insert(season, episode, format!("s{season}e{episode} prompt")).await;
}

fn spawn_session(
    h: &Harness,
    id: &str,
    device_end: Duplex,
) -> tokio::task::JoinHandle<Result<SessionReport, SessionError>> {
    let lifecycle = Arc::clone(&h.lifecycle);
    let id = device_id(id);
    tokio::spawn(async move { lifecycle.run(id, device_end, CancellationToken::new()).await })
}

#[tokio::test]
async fn test_completed_session_consumes_quota_and_advances() {
    let mut h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    let (gateway_end, mut device) = channel_duplex(32);
    let run = spawn_session(&h, "ABCD1234", gateway_end);

    // Greeting arrives before any relayed traffic.
    let ready = device.source.recv().await.unwrap().unwrap();
    match ready {
        Frame::Control(ControlFrame::SessionReady { season, episode, .. }) => {
            assert_eq!((season, episode), (1, 1));
        }
        other => panic!("expected session_ready, got {other:?}"),
    }

    let mut backend = h.backends.recv().await.unwrap();
    assert_eq!(h.connector.prompts().await, vec!["s1e1 prompt"]);

    // The registry shows the session as active while the relay runs.
    let live = h.registry.lookup(&device_id("ABCD1234")).await.unwrap();
    assert_eq!(live.status(), SessionStatus::Active);

    // Device speaks, backend hears it.
    device
        .sink
        .send(Frame::Audio(Bytes::from_static(&[0u8; 320])))
        .await
        .unwrap();
    device
        .sink
        .send(Frame::Control(ControlFrame::AudioEnd))
        .await
        .unwrap();
    assert!(matches!(
        backend.source.recv().await.unwrap().unwrap(),
        Frame::Audio(_)
    ));
    assert_eq!(
        backend.source.recv().await.unwrap().unwrap(),
        Frame::Control(ControlFrame::AudioEnd)
    );

    // Five transcript messages flow back to the device.
    for i in 0..5u32 {
        let role = if i % 2 == 0 {
            TranscriptRole::Assistant
        } else {
            TranscriptRole::Device
        };
        backend
            .sink
            .send(Frame::Control(ControlFrame::Transcript {
                role,
                text: format!("message {i}"),
            }))
            .await
            .unwrap();
        assert!(device.source.recv().await.unwrap().is_some());
    }

    // Clean device close completes the episode.
    drop(device);
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.messages, 5);
    assert_eq!(report.handle.status(), SessionStatus::Closed);

    // Exactly one quota slot consumed, profile advanced, slot released.
    assert_eq!(h.ledger.remaining(&device_id("ABCD1234")).await, DAILY_LIMIT - 1);
    let profile = h.profiles.get(&device_id("ABCD1234")).await.unwrap().unwrap();
    assert_eq!((profile.season, profile.episode), (1, 2));
    assert_eq!(profile.episodes_completed, 1);
    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());

    // Persisted record: ordered and contiguous from 1.
    let record = h
        .transcripts
        .load(report.handle.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, Some(SessionOutcome::Completed));
    let sequences: Vec<u64> = record.messages.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert!(record.device_audio_bytes > 0);
}

#[tokio::test]
async fn test_daily_limit_rejects_before_backend_connect() {
    let h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    for _ in 0..DAILY_LIMIT {
        assert!(h.ledger.try_consume(&device_id("ABCD1234")).await.allowed);
    }

    let (gateway_end, _device) = channel_duplex(8);
    let err = spawn_session(&h, "ABCD1234", gateway_end)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::DailyLimitExceeded { .. }));
    if let SessionError::DailyLimitExceeded { seconds_until_reset } = err {
        assert!(seconds_until_reset > 0 && seconds_until_reset <= 86_400);
    }

    // No backend connection was opened and no registry slot leaked.
    assert!(h.connector.prompts().await.is_empty());
    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());
}

#[tokio::test]
async fn test_second_connection_for_same_device_loses() {
    let mut h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    let (first_gw, first_device) = channel_duplex(8);
    let (second_gw, second_device) = channel_duplex(8);
    let first = spawn_session(&h, "ABCD1234", first_gw);
    let second = spawn_session(&h, "ABCD1234", second_gw);

    // Let both attempts race past authorization, then end the winner.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = h.backends.recv().await.unwrap();
    drop(first_device);
    drop(second_device);

    let results = [first.await.unwrap(), second.await.unwrap()];
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(SessionError::AlreadyConnected(_))))
        .count();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!((winners, losers), (1, 1));

    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());
}

#[tokio::test]
async fn test_backend_drop_abandons_without_consuming_quota() {
    let mut h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    let (gateway_end, mut device) = channel_duplex(32);
    let run = spawn_session(&h, "ABCD1234", gateway_end);

    assert!(device.source.recv().await.unwrap().is_some()); // session_ready
    let mut backend = h.backends.recv().await.unwrap();

    for i in 0..3u32 {
        backend
            .sink
            .send(Frame::Control(ControlFrame::Transcript {
                role: TranscriptRole::Assistant,
                text: format!("message {i}"),
            }))
            .await
            .unwrap();
        assert!(device.source.recv().await.unwrap().is_some());
    }

    drop(backend);
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, SessionOutcome::Abandoned);
    assert_eq!(report.messages, 3);

    // Abandonment neither consumes quota nor advances the profile.
    assert_eq!(h.ledger.remaining(&device_id("ABCD1234")).await, DAILY_LIMIT);
    let profile = h.profiles.get(&device_id("ABCD1234")).await.unwrap().unwrap();
    assert_eq!((profile.season, profile.episode), (1, 1));

    let record = h
        .transcripts
        .load(report.handle.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.outcome, Some(SessionOutcome::Abandoned));

    // Session time still lands in the ledger.
    let summary = h.ledger.usage_summary(&device_id("ABCD1234"), 1).await;
    assert_eq!(summary.len(), 1);
}

#[tokio::test]
async fn test_end_conversation_signal_completes_the_episode() {
    let mut h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    let (gateway_end, mut device) = channel_duplex(8);
    let run = spawn_session(&h, "ABCD1234", gateway_end);

    assert!(device.source.recv().await.unwrap().is_some()); // session_ready
    let mut backend = h.backends.recv().await.unwrap();

    device
        .sink
        .send(Frame::Control(ControlFrame::EndConversation))
        .await
        .unwrap();
    assert_eq!(
        backend.source.recv().await.unwrap().unwrap(),
        Frame::Control(ControlFrame::EndConversation)
    );

    drop(device);
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(h.ledger.remaining(&device_id("ABCD1234")).await, DAILY_LIMIT - 1);
}

#[tokio::test]
async fn test_unregistered_and_inactive_devices_are_refused() {
    let h = harness().await;

    let (gateway_end, _device) = channel_duplex(8);
    let err = spawn_session(&h, "ZZZZ9999", gateway_end)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::NotRegistered(_)));

    seed_device(&h, "ABCD1234", 1, 1).await;
    let mut profile = h.profiles.get(&device_id("ABCD1234")).await.unwrap().unwrap();
    profile.status = ProfileStatus::Suspended;
    h.profiles.upsert(&device_id("ABCD1234"), profile).await.unwrap();

    let (gateway_end, _device) = channel_duplex(8);
    let err = spawn_session(&h, "ABCD1234", gateway_end)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::InactiveDevice(_)));
    assert!(h.connector.prompts().await.is_empty());
}

#[tokio::test]
async fn test_missing_prompt_releases_the_slot() {
    let h = harness().await;
    // Profile seeded without a prompt for its position.
    h.profiles
        .upsert(
            &device_id("ABCD1234"),
            Profile {
                name: "Listener".into(),
                age: 6,
                status: ProfileStatus::Active,
                season: 4,
                episode: 2,
                episodes_completed: 22,
            },
        )
        .await
        .unwrap();

    let (gateway_end, _device) = channel_duplex(8);
    let err = spawn_session(&h, "ABCD1234", gateway_end)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::PromptNotFound { season: 4, episode: 2 }
    ));
    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());
}

#[tokio::test]
async fn test_unavailable_backend_releases_the_slot() {
    let h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;
    h.connector.set_unavailable(true);

    let (gateway_end, _device) = channel_duplex(8);
    let err = spawn_session(&h, "ABCD1234", gateway_end)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, SessionError::BackendUnavailable { .. }));
    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());

    // The device can try again once the backend is back.
    h.connector.set_unavailable(false);
    let (gateway_end, device) = channel_duplex(8);
    let run = spawn_session(&h, "ABCD1234", gateway_end);
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(device);
    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_cancellation_abandons_live_sessions() {
    let mut h = harness().await;
    seed_device(&h, "ABCD1234", 1, 1).await;

    let (gateway_end, mut device) = channel_duplex(8);
    let cancel = CancellationToken::new();
    let lifecycle = Arc::clone(&h.lifecycle);
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            lifecycle
                .run(device_id("ABCD1234"), gateway_end, cancel)
                .await
        })
    };

    assert!(device.source.recv().await.unwrap().is_some()); // session_ready
    let _backend = h.backends.recv().await.unwrap();

    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, SessionOutcome::Abandoned);
    assert_eq!(h.ledger.remaining(&device_id("ABCD1234")).await, DAILY_LIMIT);
    assert!(h.registry.lookup(&device_id("ABCD1234")).await.is_none());
}
