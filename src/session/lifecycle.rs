use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::BackendConnector;
use crate::device::DeviceId;
use crate::error::SessionError;
use crate::ledger::UsageLedger;
use crate::profile::{Advancement, Profile, Profiles};
use crate::prompt::PromptResolver;
use crate::registry::DeviceSessionRegistry;
use crate::session::{Session, SessionStatus};
use crate::relay::{
    ControlFrame, Duplex, Frame, RelayBridge, RelayOutcome, TerminationReason,
};
use crate::transcript::{
    RecorderConfig, SessionOutcome, TranscriptRecorder, TranscriptStore,
};

/// Decides whether a finished relay counts as a completed episode.
///
/// Completion drives quota consumption and episode advancement, so the
/// decision is deliberately kept out of the relay itself.
pub trait CompletionPolicy: Send + Sync {
    fn outcome(&self, relay: &RelayOutcome) -> SessionOutcome;
}

/// Default policy: an explicit advancement signal always completes; a clean
/// device close completes provided the conversation actually carried frames.
/// Drops, errors, cancellation and idle timeouts abandon the episode.
pub struct SignalOrCleanClose;

impl CompletionPolicy for SignalOrCleanClose {
    fn outcome(&self, relay: &RelayOutcome) -> SessionOutcome {
        if relay.completion_signaled {
            return SessionOutcome::Completed;
        }
        match relay.reason {
            TerminationReason::DeviceClosed { clean: true } if relay.frames_relayed > 0 => {
                SessionOutcome::Completed
            }
            TerminationReason::Error(_) => SessionOutcome::Error,
            _ => SessionOutcome::Abandoned,
        }
    }
}

/// What a finished session looked like, for logging and the close frame.
#[derive(Debug)]
pub struct SessionReport {
    pub handle: Arc<Session>,
    pub outcome: SessionOutcome,
    pub relay: RelayOutcome,
    pub duration_seconds: f64,
    pub messages: usize,
}

/// Drives one device connection from authorization through relay to the
/// finalizing funnel. One instance is shared by all connections; per-session
/// state lives on the stack of [`SessionLifecycle::run`].
pub struct SessionLifecycle {
    registry: Arc<DeviceSessionRegistry>,
    ledger: Arc<UsageLedger>,
    profiles: Arc<Profiles>,
    prompts: Arc<dyn PromptResolver>,
    connector: Arc<dyn BackendConnector>,
    transcripts: Arc<dyn TranscriptStore>,
    recorder_config: RecorderConfig,
    idle_timeout: Duration,
    completion: Arc<dyn CompletionPolicy>,
}

impl SessionLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<DeviceSessionRegistry>,
        ledger: Arc<UsageLedger>,
        profiles: Arc<Profiles>,
        prompts: Arc<dyn PromptResolver>,
        connector: Arc<dyn BackendConnector>,
        transcripts: Arc<dyn TranscriptStore>,
        recorder_config: RecorderConfig,
        idle_timeout: Duration,
        completion: Arc<dyn CompletionPolicy>,
    ) -> Self {
        Self {
            registry,
            ledger,
            profiles,
            prompts,
            connector,
            transcripts,
            recorder_config,
            idle_timeout,
            completion,
        }
    }

    /// Run one session to completion.
    ///
    /// An `Err` means the session was refused before any frame flowed; the
    /// caller maps it to a close code and nothing needs cleaning up. An `Ok`
    /// means the relay ran and the finalizing funnel has settled quota,
    /// progression, transcript and the registry slot.
    pub async fn run(
        &self,
        device_id: DeviceId,
        mut device: Duplex,
        shutdown: CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let profile = self.authorize(&device_id).await?;

        // The profile read above has no side effects; the claim settles
        // exclusivity before anything that does (quota, backend,
        // transcript), so a second connection loses without leaving a
        // trace. The session starts out `Connecting`.
        let handle = self
            .registry
            .claim(&device_id, profile.season, profile.episode)
            .await?;

        let backend = match self.prepare(&device_id, &profile).await {
            Ok(backend) => backend,
            Err(e) => {
                self.registry.release(&handle).await;
                return Err(e);
            }
        };

        let greeting = Frame::Control(ControlFrame::SessionReady {
            session_id: handle.session_id,
            season: handle.season,
            episode: handle.episode,
        });
        if let Err(e) = device.sink.send(greeting).await {
            self.registry.release(&handle).await;
            return Err(SessionError::Transport(format!(
                "device went away before the session started: {e}"
            )));
        }

        handle.set_status(SessionStatus::Active);
        info!(
            device_id = %device_id,
            session_id = %handle.session_id,
            season = handle.season,
            episode = handle.episode,
            "session bridging"
        );

        let recorder = TranscriptRecorder::open(
            Arc::clone(&self.transcripts),
            handle.session_id,
            device_id.clone(),
            handle.season,
            handle.episode,
            self.recorder_config,
        );

        let relay = RelayBridge::new(self.idle_timeout)
            .run(
                device,
                backend,
                Arc::clone(&recorder) as Arc<dyn crate::relay::FrameObserver>,
                shutdown.child_token(),
            )
            .await;

        Ok(self.finalize(device_id, handle, recorder, relay).await)
    }

    /// Profile checks that need no cleanup on failure.
    async fn authorize(&self, device_id: &DeviceId) -> Result<Profile, SessionError> {
        let profile = self
            .profiles
            .get(device_id)
            .await?
            .ok_or_else(|| SessionError::NotRegistered(device_id.clone()))?;
        if !profile.is_active() {
            return Err(SessionError::InactiveDevice(device_id.clone()));
        }
        Ok(profile)
    }

    /// Quota preflight, prompt fetch, backend connect. Runs while the
    /// registry slot is held; the caller releases it on failure.
    async fn prepare(
        &self,
        device_id: &DeviceId,
        profile: &Profile,
    ) -> Result<Duplex, SessionError> {
        if !self.ledger.can_start(device_id).await {
            return Err(SessionError::DailyLimitExceeded {
                seconds_until_reset: self.ledger.seconds_until_reset(),
            });
        }

        let prompt = self
            .prompts
            .get(profile.season, profile.episode)
            .await?
            .ok_or(SessionError::PromptNotFound {
                season: profile.season,
                episode: profile.episode,
            })?;

        self.connector.open(&prompt).await
    }

    /// The funnel every bridged session passes through exactly once.
    async fn finalize(
        &self,
        device_id: DeviceId,
        handle: Arc<Session>,
        recorder: Arc<TranscriptRecorder>,
        relay: RelayOutcome,
    ) -> SessionReport {
        handle.set_status(SessionStatus::Closing);
        let outcome = self.completion.outcome(&relay);
        let duration_seconds =
            (Utc::now() - handle.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        if outcome == SessionOutcome::Completed {
            let consumed = self.ledger.try_consume(&device_id).await;
            if !consumed.allowed {
                // The preflight passed, so this only happens when the day
                // rolled over or a concurrent path consumed the last slot.
                warn!(device_id = %device_id, "completed episode found no quota left to consume");
            }

            match self.profiles.advance_episode(&device_id).await {
                Ok(Advancement::Advanced { season, episode }) => {
                    info!(device_id = %device_id, season, episode, "profile advanced");
                }
                Ok(Advancement::SeriesComplete) => {
                    info!(device_id = %device_id, "profile has finished the series");
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "episode advancement failed");
                }
            }
        }

        self.ledger
            .record_session_time(&device_id, duration_seconds)
            .await;
        let record = recorder.finalize(outcome).await;
        self.registry.release(&handle).await;

        info!(
            device_id = %device_id,
            session_id = %handle.session_id,
            ?outcome,
            reason = ?relay.reason,
            frames = relay.frames_relayed,
            messages = record.messages.len(),
            duration_seconds,
            "session finalized"
        );

        SessionReport {
            handle,
            outcome,
            relay,
            duration_seconds,
            messages: record.messages.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(reason: TerminationReason, signaled: bool, frames: u64) -> RelayOutcome {
        RelayOutcome {
            reason,
            completion_signaled: signaled,
            frames_relayed: frames,
        }
    }

    #[test]
    fn clean_close_with_traffic_completes() {
        let outcome =
            SignalOrCleanClose.outcome(&relay(TerminationReason::DeviceClosed { clean: true }, false, 5));
        assert_eq!(outcome, SessionOutcome::Completed);
    }

    #[test]
    fn clean_close_without_traffic_is_abandoned() {
        let outcome =
            SignalOrCleanClose.outcome(&relay(TerminationReason::DeviceClosed { clean: true }, false, 0));
        assert_eq!(outcome, SessionOutcome::Abandoned);
    }

    #[test]
    fn advancement_signal_completes_even_on_backend_close() {
        let outcome = SignalOrCleanClose.outcome(&relay(TerminationReason::BackendClosed, true, 12));
        assert_eq!(outcome, SessionOutcome::Completed);
    }

    #[test]
    fn drops_and_timeouts_abandon() {
        for reason in [
            TerminationReason::DeviceClosed { clean: false },
            TerminationReason::BackendClosed,
            TerminationReason::Cancelled,
            TerminationReason::IdleTimeout,
        ] {
            assert_eq!(
                SignalOrCleanClose.outcome(&relay(reason, false, 8)),
                SessionOutcome::Abandoned
            );
        }
    }

    #[test]
    fn relay_errors_are_errors() {
        let outcome =
            SignalOrCleanClose.outcome(&relay(TerminationReason::Error("overflow".into()), false, 8));
        assert_eq!(outcome, SessionOutcome::Error);
    }
}
