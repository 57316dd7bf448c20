use thiserror::Error;

use crate::device::DeviceId;

/// WebSocket close code sent to the device when a session is refused or
/// torn down. 1000 is a normal close; 4xxx codes are application-defined.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_INVALID_DEVICE_ID: u16 = 4000;
pub const CLOSE_NOT_REGISTERED: u16 = 4001;
pub const CLOSE_PROMPT_NOT_FOUND: u16 = 4002;
pub const CLOSE_BACKEND_UNAVAILABLE: u16 = 4003;
pub const CLOSE_INACTIVE_DEVICE: u16 = 4004;
pub const CLOSE_ALREADY_CONNECTED: u16 = 4008;
pub const CLOSE_DAILY_LIMIT: u16 = 4029;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Everything that can end a session attempt before or during bridging.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid device id {0:?}: expected 4 uppercase letters followed by 4 digits")]
    InvalidDeviceId(String),

    #[error("device {0} is not registered")]
    NotRegistered(DeviceId),

    #[error("device {0} is not active")]
    InactiveDevice(DeviceId),

    #[error("device {0} already has an active session")]
    AlreadyConnected(DeviceId),

    #[error("daily episode limit reached; resets in {seconds_until_reset}s")]
    DailyLimitExceeded { seconds_until_reset: i64 },

    #[error("no prompt for season {season}, episode {episode}")]
    PromptNotFound { season: u32, episode: u32 },

    #[error("AI backend unavailable after {attempts} attempts: {message}")]
    BackendUnavailable { attempts: u32, message: String },

    #[error("transcript capture buffer overflowed ({unflushed} unflushed messages)")]
    TranscriptOverflow { unflushed: usize },

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Close code surfaced to the device for this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            SessionError::InvalidDeviceId(_) => CLOSE_INVALID_DEVICE_ID,
            SessionError::NotRegistered(_) => CLOSE_NOT_REGISTERED,
            SessionError::InactiveDevice(_) => CLOSE_INACTIVE_DEVICE,
            SessionError::AlreadyConnected(_) => CLOSE_ALREADY_CONNECTED,
            SessionError::DailyLimitExceeded { .. } => CLOSE_DAILY_LIMIT,
            SessionError::PromptNotFound { .. } => CLOSE_PROMPT_NOT_FOUND,
            SessionError::BackendUnavailable { .. } => CLOSE_BACKEND_UNAVAILABLE,
            SessionError::TranscriptOverflow { .. }
            | SessionError::Storage(_)
            | SessionError::Transport(_) => CLOSE_INTERNAL_ERROR,
        }
    }

    /// Short machine-readable reason for logs and close frames.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SessionError::InvalidDeviceId(_) => "invalid_device_id",
            SessionError::NotRegistered(_) => "not_registered",
            SessionError::InactiveDevice(_) => "inactive_device",
            SessionError::AlreadyConnected(_) => "already_connected",
            SessionError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            SessionError::PromptNotFound { .. } => "prompt_not_found",
            SessionError::BackendUnavailable { .. } => "backend_unavailable",
            SessionError::TranscriptOverflow { .. } => "transcript_overflow",
            SessionError::Storage(_) => "storage_unavailable",
            SessionError::Transport(_) => "transport_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_are_stable() {
        let err = SessionError::InvalidDeviceId("nope".into());
        assert_eq!(err.close_code(), CLOSE_INVALID_DEVICE_ID);

        let err = SessionError::DailyLimitExceeded { seconds_until_reset: 3600 };
        assert_eq!(err.close_code(), CLOSE_DAILY_LIMIT);
        assert_eq!(err.reason_code(), "daily_limit_exceeded");
    }
}
