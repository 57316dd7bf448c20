use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::ledger::UsageLedger;
use crate::registry::DeviceSessionRegistry;
use crate::session::SessionLifecycle;
use crate::transcript::TranscriptStore;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<SessionLifecycle>,
    pub registry: Arc<DeviceSessionRegistry>,
    pub ledger: Arc<UsageLedger>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub service_name: String,
    /// Cancelling this token winds down every live session.
    pub shutdown: CancellationToken,
}
