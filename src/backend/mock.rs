//! Channel-backed connector for tests and local development. Each open
//! conversation surfaces its far endpoint to the caller, which plays the
//! backend by hand.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use super::BackendConnector;
use crate::error::SessionError;
use crate::relay::{channel_duplex, Duplex};

pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<Duplex>,
    prompts: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl ChannelConnector {
    /// Returns the connector and the stream of backend-side endpoints,
    /// one per successful `open`.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Duplex>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers: tx,
            prompts: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        (connector, rx)
    }

    /// Make subsequent opens fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail.store(unavailable, Ordering::SeqCst);
    }

    /// Prompts seen so far, in open order.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl BackendConnector for ChannelConnector {
    async fn open(&self, prompt: &str) -> Result<Duplex, SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::BackendUnavailable {
                attempts: 1,
                message: "connection refused".into(),
            });
        }

        self.prompts.lock().await.push(prompt.to_string());

        let (near, far) = channel_duplex(32);
        if self.peers.send(far).is_err() {
            return Err(SessionError::BackendUnavailable {
                attempts: 1,
                message: "no backend listener".into(),
            });
        }
        Ok(near)
    }
}
