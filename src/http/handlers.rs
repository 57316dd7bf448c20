use super::state::AppState;
use super::ws;
use crate::device::DeviceId;
use crate::error::{SessionError, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
use crate::ledger::DailyUsageRecord;
use crate::session::SessionSnapshot;
use crate::transcript::{ConversationRecord, SessionOutcome};
use axum::{
    extract::ws::WebSocketUpgrade,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// How many days back to report (default 7)
    pub days: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptsQuery {
    /// Maximum records to return, newest first (default 10)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub device_id: String,
    pub days: Vec<DailyUsageRecord>,
}

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub device_id: String,
    pub daily_limit: u32,
    pub remaining: u32,
    pub can_start: bool,
    pub seconds_until_reset: i64,
}

#[derive(Debug, Serialize)]
pub struct TranscriptsResponse {
    pub device_id: String,
    pub conversations: Vec<ConversationRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Device socket
// ============================================================================

/// GET /ws/:device_id
/// Upgrade to the device session socket and run the session to completion.
///
/// The identifier is validated after the upgrade so a malformed one can be
/// answered with close code 4000 on the socket itself, before any other
/// side effect.
pub async fn device_socket(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        let (source, sink, shared) = ws::split(socket);

        let device_id: DeviceId = match device_id.parse() {
            Ok(id) => id,
            Err(e @ SessionError::InvalidDeviceId(_)) => {
                warn!(error = %e, "rejecting malformed device id");
                ws::close(&shared, e.close_code(), e.reason_code()).await;
                return;
            }
            Err(e) => {
                ws::close(&shared, CLOSE_INTERNAL_ERROR, e.reason_code()).await;
                return;
            }
        };

        let duplex = crate::relay::Duplex::new(source, sink);
        match state
            .lifecycle
            .run(device_id.clone(), duplex, state.shutdown.clone())
            .await
        {
            Ok(report) => {
                let reason = match report.outcome {
                    SessionOutcome::Completed => "completed",
                    SessionOutcome::Abandoned => "abandoned",
                    SessionOutcome::Error => "error",
                };
                let code = match report.outcome {
                    SessionOutcome::Error => CLOSE_INTERNAL_ERROR,
                    _ => CLOSE_NORMAL,
                };
                ws::close(&shared, code, reason).await;
            }
            Err(e) => {
                info!(device_id = %device_id, reason = e.reason_code(), "session refused");
                ws::close(&shared, e.close_code(), e.reason_code()).await;
            }
        }
    })
}

// ============================================================================
// REST handlers
// ============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active_sessions = state.registry.list_active().await.len();
    Json(HealthResponse {
        status: "ok".to_string(),
        service: state.service_name.clone(),
        active_sessions,
    })
}

/// GET /sessions
/// Active sessions with their current status, read-only.
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionSnapshot> = state
        .registry
        .list_active()
        .await
        .iter()
        .map(|session| session.snapshot())
        .collect();
    Json(sessions)
}

/// GET /devices/:device_id/usage?days=N
pub async fn device_usage(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<UsageQuery>,
) -> Response {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let days = state
        .ledger
        .usage_summary(&device_id, query.days.unwrap_or(7))
        .await;
    Json(UsageResponse {
        device_id: device_id.to_string(),
        days,
    })
    .into_response()
}

/// GET /devices/:device_id/limits
/// Quota preflight: lets a device ask before opening a session.
pub async fn device_limits(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let remaining = state.ledger.remaining(&device_id).await;
    Json(LimitsResponse {
        device_id: device_id.to_string(),
        daily_limit: state.ledger.daily_limit(),
        remaining,
        can_start: remaining > 0,
        seconds_until_reset: state.ledger.seconds_until_reset(),
    })
    .into_response()
}

/// GET /devices/:device_id/transcripts?limit=N
pub async fn device_transcripts(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<TranscriptsQuery>,
) -> Response {
    let device_id = match parse_device_id(&device_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state
        .transcripts
        .list_for_device(&device_id, query.limit.unwrap_or(10))
        .await
    {
        Ok(conversations) => Json(TranscriptsResponse {
            device_id: device_id.to_string(),
            conversations,
        })
        .into_response(),
        Err(e) => {
            warn!(device_id = %device_id, error = %e, "transcript listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "transcript storage unavailable".to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn parse_device_id(raw: &str) -> Result<DeviceId, Response> {
    raw.parse().map_err(|e: SessionError| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response()
    })
}
