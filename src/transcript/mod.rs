//! Transcript capture and persistence
//!
//! Every session owns one `TranscriptRecorder` that observes the relay,
//! assigns a total order to the messages exchanged, and writes the
//! conversation record through a `TranscriptStore` so it survives the
//! process. Appends never block the relay path beyond an in-memory push;
//! a background flusher persists snapshots every few messages, and a slow
//! or failing store is tolerated up to a configured buffering cap before
//! the session is failed.

mod message;
mod recorder;
mod store;

pub use message::{ConversationRecord, SessionOutcome, TranscriptMessage};
pub use recorder::{RecorderConfig, TranscriptRecorder};
pub use store::{FsTranscriptStore, MemoryTranscriptStore, TranscriptStore};
