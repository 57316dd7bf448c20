use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frame::{ControlFrame, Frame, FrameDirection, TerminationReason};
use super::transport::{Duplex, FrameSink, FrameSource};

/// How long the bridge waits for its pumps to wind down after termination
/// has been decided, before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Failure modes an observer may report. Anything other than overflow is
/// the observer's own problem and must not reach the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// The transcript capture buffer is full; the session must end rather
    /// than silently drop messages.
    Overflow,
}

/// Receives every relayed frame. Observation is best-effort with respect to
/// the relay duty: an erroring observer never blocks a frame from being
/// forwarded, except for the overflow condition.
#[async_trait::async_trait]
pub trait FrameObserver: Send + Sync {
    async fn on_frame(&self, direction: FrameDirection, frame: &Frame) -> Result<(), ObserverError>;
}

/// What the bridge saw by the time it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub reason: TerminationReason,
    /// An explicit advancement signal (`EndConversation` from the device or
    /// `EpisodeComplete` from the backend) was observed. Completion policy
    /// is decided by the caller, not here.
    pub completion_signaled: bool,
    pub frames_relayed: u64,
}

struct Shared {
    started: Instant,
    /// Milliseconds since `started` at the time of the last frame.
    last_activity_ms: AtomicU64,
    completion_signaled: AtomicBool,
    frames_relayed: AtomicU64,
}

impl Shared {
    fn touch(&self) {
        self.last_activity_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let elapsed = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(elapsed.saturating_sub(self.last_activity_ms.load(Ordering::Relaxed)))
    }
}

/// Pumps frames both ways between a device transport and a backend stream
/// until either side closes, an error occurs, the idle timeout fires, or
/// the session is cancelled from outside.
pub struct RelayBridge {
    idle_timeout: Duration,
}

impl RelayBridge {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub async fn run(
        &self,
        device: Duplex,
        backend: Duplex,
        observer: Arc<dyn FrameObserver>,
        cancel: CancellationToken,
    ) -> RelayOutcome {
        let shared = Arc::new(Shared {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            completion_signaled: AtomicBool::new(false),
            frames_relayed: AtomicU64::new(0),
        });
        let stop = CancellationToken::new();

        let mut pumps = JoinSet::new();
        pumps.spawn(pump(
            device.source,
            backend.sink,
            FrameDirection::DeviceToBackend,
            Arc::clone(&observer),
            Arc::clone(&shared),
            stop.clone(),
        ));
        pumps.spawn(pump(
            backend.source,
            device.sink,
            FrameDirection::BackendToDevice,
            observer,
            Arc::clone(&shared),
            stop.clone(),
        ));

        // Watchdog tick: often enough for a timely idle verdict, cheap
        // enough to never matter.
        let tick = (self.idle_timeout / 4).clamp(Duration::from_millis(50), Duration::from_secs(5));

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break TerminationReason::Cancelled,
                joined = pumps.join_next() => match joined {
                    Some(Ok(Some(reason))) => break reason,
                    Some(Ok(None)) => continue,
                    Some(Err(e)) => break TerminationReason::Error(format!("relay task failed: {e}")),
                    None => break TerminationReason::Error("both relay pumps exited silently".into()),
                },
                _ = tokio::time::sleep(tick) => {
                    if shared.idle_for() >= self.idle_timeout {
                        debug!(idle_secs = shared.idle_for().as_secs(), "relay idle timeout");
                        break TerminationReason::IdleTimeout;
                    }
                }
            }
        };

        // Wind the other pump down; abort if it is wedged in a send.
        stop.cancel();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while pumps.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("relay pumps did not stop within grace period, aborting");
            pumps.abort_all();
            while pumps.join_next().await.is_some() {}
        }

        RelayOutcome {
            reason,
            completion_signaled: shared.completion_signaled.load(Ordering::Relaxed),
            frames_relayed: shared.frames_relayed.load(Ordering::Relaxed),
        }
    }
}

/// One relay direction. Returns the termination reason when this pump ended
/// the session, or `None` when it was stopped from outside.
async fn pump(
    mut source: Box<dyn FrameSource>,
    mut sink: Box<dyn FrameSink>,
    direction: FrameDirection,
    observer: Arc<dyn FrameObserver>,
    shared: Arc<Shared>,
    stop: CancellationToken,
) -> Option<TerminationReason> {
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => return None,
            received = source.recv() => match received {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Some(match direction {
                        FrameDirection::DeviceToBackend => TerminationReason::DeviceClosed { clean: true },
                        FrameDirection::BackendToDevice => TerminationReason::BackendClosed,
                    });
                }
                Err(e) => {
                    debug!(?direction, error = %e, "transport receive failed");
                    return Some(match direction {
                        FrameDirection::DeviceToBackend => TerminationReason::DeviceClosed { clean: false },
                        FrameDirection::BackendToDevice => TerminationReason::BackendClosed,
                    });
                }
            },
        };

        shared.touch();

        let is_advancement_signal = matches!(
            (&frame, direction),
            (Frame::Control(ControlFrame::EndConversation), FrameDirection::DeviceToBackend)
                | (Frame::Control(ControlFrame::EpisodeComplete), FrameDirection::BackendToDevice)
        );
        if is_advancement_signal {
            shared.completion_signaled.store(true, Ordering::Relaxed);
        }

        if let Err(ObserverError::Overflow) = observer.on_frame(direction, &frame).await {
            return Some(TerminationReason::Error("transcript capture overflow".into()));
        }

        if let Err(e) = sink.send(frame).await {
            debug!(?direction, error = %e, "transport send failed");
            return Some(match direction {
                FrameDirection::DeviceToBackend => TerminationReason::BackendClosed,
                FrameDirection::BackendToDevice => TerminationReason::DeviceClosed { clean: false },
            });
        }
        shared.frames_relayed.fetch_add(1, Ordering::Relaxed);
    }
}
