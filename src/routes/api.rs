use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{diagnostics, health_check, ready_check};
use crate::store::RoomHub;
use crate::websocket::websocket_handler;

/// Create API routes
pub fn create_api_routes(hub: RoomHub) -> Router {
    Router::<RoomHub>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .with_state(hub)
}

/// The whole relay: WebSocket rooms, API and Swagger UI
pub fn create_app(hub: RoomHub) -> Router {
    let ws_routes = Router::<RoomHub>::new()
        .route("/ws/:room_id", get(websocket_handler))
        .with_state(hub.clone());

    Router::new()
        .merge(ws_routes)
        .nest("/api", create_api_routes(hub))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
