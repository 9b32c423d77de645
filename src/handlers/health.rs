use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::time::Instant;

use crate::handlers::AppState;

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Basic liveness probe - just checks if the service is running
async fn liveness_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": get_uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness probe - checks that the database answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let db_latency = start.elapsed().as_millis() as u64;

    match db_result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "database": { "status": "up", "latency_ms": db_latency } },
                "sessions": state.sessions.len(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "database": { "status": "down", "error": e.to_string() } },
            })),
        ),
    }
}

/// Creates the router for health check endpoints
///
/// Endpoints:
/// - GET /health       - Basic liveness probe
/// - GET /health/ready - Readiness probe (checks database connectivity)
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness_check))
        .route("/ready", get(readiness_check))
}
