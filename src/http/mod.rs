//! HTTP surface of the gateway.
//!
//! One WebSocket route carries the device sessions; the rest is a small
//! read-only REST API:
//! - GET /ws/:device_id - device session socket
//! - GET /health - health check
//! - GET /sessions - active session handles
//! - GET /devices/:device_id/usage - daily usage summaries
//! - GET /devices/:device_id/limits - quota preflight
//! - GET /devices/:device_id/transcripts - persisted conversations

mod handlers;
mod routes;
mod state;
mod ws;

pub use routes::create_router;
pub use state::AppState;
