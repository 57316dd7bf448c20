//! Connections to the conversational AI backend.
//!
//! A connector turns an episode prompt into an open [`Duplex`] the relay
//! can pump frames through. The production connector speaks the OpenAI
//! realtime dialect; a channel-backed connector stands in for it in tests.

mod mock;
mod openai;

pub use mock::ChannelConnector;
pub use openai::OpenAiConnector;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::relay::Duplex;

#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Open a backend conversation primed with the episode prompt.
    /// Implementations retry transient connect failures internally and
    /// return `BackendUnavailable` once the attempts are spent.
    async fn open(&self, prompt: &str) -> Result<Duplex, SessionError>;
}
