//! HTTP API for the ParkFlow node.

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parkflow_realtime::ConnectionHub;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::events::ParkingEvents;
use crate::realtime_api::realtime_routes;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Real-time connection hub.
    pub hub: Arc<ConnectionHub>,
    /// Event publisher over the same hub.
    pub events: ParkingEvents,
}

impl AppState {
    /// Create state around a hub.
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        let events = ParkingEvents::new(hub.clone());
        Self { hub, events }
    }
}

/// Creates the API router.
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(realtime_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

/// CORS for the dashboard. Empty or `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.connection_count(),
    }))
}
