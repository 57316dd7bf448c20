use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Device session socket
        .route("/ws/:device_id", get(handlers::device_socket))
        // Health check
        .route("/health", get(handlers::health_check))
        // Read-only admin surface
        .route("/sessions", get(handlers::list_sessions))
        .route("/devices/:device_id/usage", get(handlers::device_usage))
        .route("/devices/:device_id/limits", get(handlers::device_limits))
        .route(
            "/devices/:device_id/transcripts",
            get(handlers::device_transcripts),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
