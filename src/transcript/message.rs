use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceId;
use crate::relay::TranscriptRole;

/// Terminal status of a persisted conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Abandoned,
    Error,
}

/// One ordered message within a conversation. The sequence number is
/// assigned by the recorder at append time, 1-based and contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub sequence: u64,
    pub role: TranscriptRole,
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable record of one session's conversation. Created together with the
/// live session, appended to only by its recorder, immutable once
/// finalized (except for soft-delete marking by admin tooling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: Uuid,
    pub device_id: DeviceId,
    pub season: u32,
    pub episode: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub messages: Vec<TranscriptMessage>,
    pub outcome: Option<SessionOutcome>,
    /// Relayed audio volume per direction. Audio payloads themselves are
    /// not part of the transcript.
    pub device_audio_bytes: u64,
    pub assistant_audio_bytes: u64,
    #[serde(default)]
    pub deleted: bool,
}

impl ConversationRecord {
    pub fn new(session_id: Uuid, device_id: DeviceId, season: u32, episode: u32) -> Self {
        Self {
            session_id,
            device_id,
            season,
            episode,
            started_at: Utc::now(),
            ended_at: None,
            messages: Vec::new(),
            outcome: None,
            device_audio_bytes: 0,
            assistant_audio_bytes: 0,
            deleted: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome.is_some()
    }
}
