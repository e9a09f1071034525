use axum::{extract::State, Json};
use tracing::debug;

use crate::models::HealthResponse;
use crate::store::RoomHub;

/// Liveness probe
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Relay is running".to_string(),
    })
}

/// Readiness probe. The hub has no external dependencies, so it only reports
/// how busy it is.
pub async fn ready_check(State(hub): State<RoomHub>) -> Json<HealthResponse> {
    debug!("Readiness check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: format!("Relay is ready ({} live rooms)", hub.room_count()),
    })
}
