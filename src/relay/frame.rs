use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of traffic relayed between the device and the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Raw PCM16 audio payload, opaque to the gateway.
    Audio(Bytes),
    /// Free-form text (device keyboards, debugging consoles).
    Text(String),
    /// Structured control traffic.
    Control(ControlFrame),
}

/// Control vocabulary of the device wire protocol. Serialized as tagged
/// JSON text messages on the device WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Server -> device greeting once the session reaches Bridging.
    SessionReady {
        session_id: Uuid,
        season: u32,
        episode: u32,
    },
    Ping,
    Pong,
    /// Device finished an utterance; the backend should respond now.
    AudioEnd,
    /// Device is done with this episode (explicit advancement signal).
    EndConversation,
    /// Transcribed speech, emitted by the backend for both parties.
    Transcript { role: TranscriptRole, text: String },
    /// Backend signalled that the episode's conversation is complete.
    EpisodeComplete,
    Error { code: String, message: String },
}

/// Who produced a transcribed or recorded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    Device,
    Assistant,
    System,
}

/// Which way a frame was travelling when observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    DeviceToBackend,
    BackendToDevice,
}

/// Why the relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Device closed its connection. `clean` distinguishes a normal close
    /// from an abrupt drop.
    DeviceClosed { clean: bool },
    BackendClosed,
    Error(String),
    Cancelled,
    IdleTimeout,
}
