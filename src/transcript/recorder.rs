use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::message::{ConversationRecord, SessionOutcome, TranscriptMessage};
use super::store::TranscriptStore;
use crate::device::DeviceId;
use crate::error::SessionError;
use crate::relay::{ControlFrame, Frame, FrameDirection, FrameObserver, ObserverError, TranscriptRole};

/// Finalize retries before the write is handed to a background task.
const FINALIZE_ATTEMPTS: u32 = 3;
/// Background reconciliation: retry cadence and bound.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
const RECONCILE_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Unpersisted messages tolerated before appends fail the session.
    pub buffer_cap: usize,
    /// Persist a snapshot every N appended messages.
    pub flush_every: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_cap: 256,
            flush_every: 5,
        }
    }
}

struct RecorderState {
    record: ConversationRecord,
    /// Messages appended since the last successful store write.
    unflushed: usize,
}

/// Accumulates one session's transcript and writes it through the store.
///
/// The recorder assigns sequence numbers itself, so the persisted order is
/// total and contiguous even when the two relay directions deliver frames
/// out of wall-clock order. Persistence runs on a background flusher task,
/// so an append never waits on the store; the buffering cap bounds how far
/// the persisted snapshot may trail the in-memory record.
pub struct TranscriptRecorder {
    store: Arc<dyn TranscriptStore>,
    config: RecorderConfig,
    state: Mutex<RecorderState>,
    flush_signal: Arc<Notify>,
}

impl TranscriptRecorder {
    pub fn open(
        store: Arc<dyn TranscriptStore>,
        session_id: Uuid,
        device_id: DeviceId,
        season: u32,
        episode: u32,
        config: RecorderConfig,
    ) -> Arc<Self> {
        let recorder = Arc::new(Self {
            store,
            config,
            state: Mutex::new(RecorderState {
                record: ConversationRecord::new(session_id, device_id, season, episode),
                unflushed: 0,
            }),
            flush_signal: Arc::new(Notify::new()),
        });

        // The flusher holds the recorder weakly so it cannot outlive the
        // session; finalize signals it one last time so it always exits.
        let signal = Arc::clone(&recorder.flush_signal);
        let weak = Arc::downgrade(&recorder);
        tokio::spawn(async move {
            loop {
                signal.notified().await;
                let Some(recorder) = weak.upgrade() else { break };
                if recorder.flush_pending().await {
                    break;
                }
            }
        });

        recorder
    }

    /// Append one message. Assigns the next sequence number. Never waits on
    /// the store; persistence is the flusher task's job. Fails only when
    /// the unpersisted backlog exceeds the buffering cap: a transcript
    /// with undetectably missing messages is worse than an ended session.
    pub async fn append(
        &self,
        role: TranscriptRole,
        payload: String,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;

        if state.record.is_finalized() {
            warn!(session_id = %state.record.session_id, "append after finalize dropped");
            return Ok(());
        }

        if state.unflushed >= self.config.buffer_cap {
            return Err(SessionError::TranscriptOverflow {
                unflushed: state.unflushed,
            });
        }

        let sequence = state.record.messages.len() as u64 + 1;
        state.record.messages.push(TranscriptMessage {
            sequence,
            role,
            payload,
            timestamp,
        });
        state.unflushed += 1;

        if state.unflushed >= self.config.flush_every {
            self.flush_signal.notify_one();
        }

        Ok(())
    }

    /// One flusher pass: persist a snapshot of the record if anything is
    /// pending. Returns true once the record is finalized, which tells the
    /// flusher task to exit; finalize does its own writing.
    async fn flush_pending(&self) -> bool {
        let (snapshot, snapshot_len) = {
            let state = self.state.lock().await;
            if state.record.is_finalized() {
                return true;
            }
            if state.unflushed == 0 {
                return false;
            }
            (state.record.clone(), state.record.messages.len())
        };

        // The lock is not held across the write, so appends keep flowing
        // while a slow store catches up.
        match self.store.save(&snapshot).await {
            Ok(()) => {
                let sealed = {
                    let mut state = self.state.lock().await;
                    if !state.record.is_finalized() {
                        let appended_since =
                            state.record.messages.len().saturating_sub(snapshot_len);
                        state.unflushed = state.unflushed.min(appended_since);
                        return false;
                    }
                    state.record.clone()
                };
                // Finalize sealed the record while this snapshot was in
                // flight; write again so the sealed record is what lands
                // last in the store.
                if let Err(e) = self.store.save(&sealed).await {
                    warn!(
                        session_id = %sealed.session_id,
                        error = %e,
                        "post-finalize flush failed"
                    );
                }
                return true;
            }
            // Keep buffering; the cap in append bounds how long.
            Err(e) => warn!(
                session_id = %snapshot.session_id,
                error = %e,
                "transcript flush failed, buffering"
            ),
        }
        false
    }

    /// Account relayed audio volume without creating a message.
    pub async fn note_audio(&self, direction: FrameDirection, bytes: u64) {
        let mut state = self.state.lock().await;
        if state.record.is_finalized() {
            return;
        }
        match direction {
            FrameDirection::DeviceToBackend => state.record.device_audio_bytes += bytes,
            FrameDirection::BackendToDevice => state.record.assistant_audio_bytes += bytes,
        }
    }

    /// Seal the record with its terminal outcome and persist it.
    /// Idempotent: the first call wins, later calls return the sealed
    /// record unchanged. If the store stays unavailable past the bounded
    /// retries, the write moves to a background task so the caller can
    /// release the session's resources promptly.
    pub async fn finalize(&self, outcome: SessionOutcome) -> ConversationRecord {
        let mut state = self.state.lock().await;

        if state.record.is_finalized() {
            return state.record.clone();
        }

        state.record.ended_at = Some(Utc::now());
        state.record.outcome = Some(outcome);
        // Wake the flusher so it sees the sealed record and exits.
        self.flush_signal.notify_one();

        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.store.save(&state.record).await {
                Ok(()) => {
                    state.unflushed = 0;
                    info!(
                        session_id = %state.record.session_id,
                        ?outcome,
                        messages = state.record.messages.len(),
                        "transcript finalized"
                    );
                    return state.record.clone();
                }
                Err(e) => warn!(
                    session_id = %state.record.session_id,
                    attempt,
                    error = %e,
                    "transcript finalize write failed"
                ),
            }
        }

        // Storage is out; queue the sealed record for reconciliation
        // instead of holding the session open.
        let record = state.record.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for _ in 0..RECONCILE_ATTEMPTS {
                tokio::time::sleep(RECONCILE_INTERVAL).await;
                match store.save(&record).await {
                    Ok(()) => {
                        info!(session_id = %record.session_id, "transcript write reconciled");
                        return;
                    }
                    Err(e) => {
                        warn!(session_id = %record.session_id, error = %e, "transcript reconcile failed");
                    }
                }
            }
            error!(
                session_id = %record.session_id,
                "giving up on transcript write after bounded retries"
            );
        });

        state.record.clone()
    }

    pub async fn snapshot(&self) -> ConversationRecord {
        self.state.lock().await.record.clone()
    }
}

#[async_trait::async_trait]
impl FrameObserver for TranscriptRecorder {
    async fn on_frame(&self, direction: FrameDirection, frame: &Frame) -> Result<(), ObserverError> {
        let result = match frame {
            Frame::Audio(data) => {
                self.note_audio(direction, data.len() as u64).await;
                Ok(())
            }
            Frame::Text(text) => {
                let role = match direction {
                    FrameDirection::DeviceToBackend => TranscriptRole::Device,
                    FrameDirection::BackendToDevice => TranscriptRole::Assistant,
                };
                self.append(role, text.clone(), Utc::now()).await
            }
            Frame::Control(ControlFrame::Transcript { role, text }) => {
                self.append(*role, text.clone(), Utc::now()).await
            }
            Frame::Control(ControlFrame::EndConversation) => {
                self.append(
                    TranscriptRole::System,
                    "device ended the conversation".into(),
                    Utc::now(),
                )
                .await
            }
            Frame::Control(ControlFrame::EpisodeComplete) => {
                self.append(TranscriptRole::System, "episode complete".into(), Utc::now())
                    .await
            }
            Frame::Control(ControlFrame::Error { code, message }) => {
                self.append(
                    TranscriptRole::System,
                    format!("backend error {code}: {message}"),
                    Utc::now(),
                )
                .await
            }
            // Ping/pong, audio-end markers and the greeting are connection
            // plumbing, not conversation.
            Frame::Control(_) => Ok(()),
        };

        // Append only fails on overflow, the one condition that must
        // abort the relay.
        result.map_err(|_| ObserverError::Overflow)
    }
}
