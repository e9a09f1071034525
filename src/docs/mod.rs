use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Relay is running", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Relay accepts connections", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Room and process statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse),
        (status = 500, description = "System monitor unavailable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Join a room over WebSocket
#[utoipa::path(
    get,
    path = "/ws/{room_id}",
    params(
        ("room_id" = String, Path, description = "Room to join"),
        ("client_id" = Option<u64>, Query, description = "Client id, doubles as the CRDT peer id")
    ),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol")
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        websocket_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, ErrorResponse, ParticipantPresence)
    ),
    tags(
        (name = "relay", description = "Collaborative editing relay")
    )
)]
pub struct ApiDoc;
