//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use tracing::warn;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /api/health` — reports version and database reachability.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_connected = match state.auth.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("health check: store unreachable: {e}");
            false
        }
    };
    Json(HealthResponse {
        status: if db_connected { "ok" } else { "degraded" }.into(),
        version: schoolgate_core::version().into(),
        db_connected,
    })
}
