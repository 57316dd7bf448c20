use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

use crate::device::DeviceId;

/// Where a session is in its life.
///
/// Transitions only move forward: `Connecting → Active → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Slot claimed; quota, prompt and backend not yet settled.
    Connecting,
    /// The relay bridge is running.
    Active,
    /// The finalizing funnel is settling quota, transcript and progression.
    Closing,
    /// Released from the registry.
    Closed,
}

impl SessionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One live session. Identity is fixed when the registry slot is claimed;
/// the status advances as the lifecycle moves through its phases, so the
/// admin surface can tell a connecting session from an active or closing
/// one.
#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub device_id: DeviceId,
    pub season: u32,
    pub episode: u32,
    pub started_at: DateTime<Utc>,
    status: AtomicU8,
}

impl Session {
    pub fn new(device_id: DeviceId, season: u32, episode: u32) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device_id,
            season,
            episode,
            started_at: Utc::now(),
            status: AtomicU8::new(SessionStatus::Connecting as u8),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Advance the status. A stale transition (a late `Active` landing
    /// after `Closing`, say) never moves the session backwards.
    pub fn set_status(&self, next: SessionStatus) {
        self.status.fetch_max(next as u8, Ordering::AcqRel);
    }

    /// Point-in-time view for the read-only admin endpoints.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            device_id: self.device_id.clone(),
            season: self.season,
            episode: self.episode,
            started_at: self.started_at,
            status: self.status(),
        }
    }
}

/// Serializable view of a [`Session`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub device_id: DeviceId,
    pub season: u32,
    pub episode: u32,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}
