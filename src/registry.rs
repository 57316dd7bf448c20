use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::device::DeviceId;
use crate::error::SessionError;
use crate::session::{Session, SessionStatus};

/// Tracks at most one live session per device.
///
/// `claim` is atomic: the existence check and the insert happen under one
/// write lock, so two simultaneous claims for the same device cannot both
/// succeed. The existing session always wins.
#[derive(Default)]
pub struct DeviceSessionRegistry {
    sessions: RwLock<HashMap<DeviceId, Arc<Session>>>,
}

impl DeviceSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session slot for a device. Fails with `AlreadyConnected`
    /// if a session is already registered; never replaces one. The new
    /// session starts out `Connecting`.
    pub async fn claim(
        &self,
        device_id: &DeviceId,
        season: u32,
        episode: u32,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(device_id) {
            return Err(SessionError::AlreadyConnected(device_id.clone()));
        }

        let session = Arc::new(Session::new(device_id.clone(), season, episode));
        sessions.insert(device_id.clone(), Arc::clone(&session));
        debug!(device_id = %device_id, session_id = %session.session_id, "session slot claimed");
        Ok(session)
    }

    /// Release a previously claimed slot and mark the session `Closed`.
    /// Idempotent: releasing an unknown or already-released session is a
    /// no-op, and a stale handle never evicts a newer session for the same
    /// device.
    pub async fn release(&self, session: &Session) {
        let mut sessions = self.sessions.write().await;
        let matches = sessions
            .get(&session.device_id)
            .map(|current| current.session_id == session.session_id)
            .unwrap_or(false);
        if matches {
            sessions.remove(&session.device_id);
            debug!(
                device_id = %session.device_id,
                session_id = %session.session_id,
                "session slot released"
            );
        }
        session.set_status(SessionStatus::Closed);
    }

    pub async fn lookup(&self, device_id: &DeviceId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(device_id).cloned()
    }

    pub async fn list_active(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}
