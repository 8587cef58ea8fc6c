//! JSON API consumed by the room dashboard and the TTN webhook.

use axum::Router;
use axum::routing::{delete, get, post, put};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::services::retention::CleanupGate;
use crate::store::TelemetryStore;

pub mod handlers;

/// Shared by every request; the store owns the only pooled resource.
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub config: Config,
    /// Shared with the cleanup timer so background deletes never overlap.
    pub cleanup_gate: CleanupGate,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/rooms", get(handlers::list_rooms).post(handlers::create_room))
        .route(
            "/api/rooms/:id",
            get(handlers::get_room)
                .put(handlers::update_room)
                .delete(handlers::delete_room),
        )
        .route("/api/devices", get(handlers::list_devices))
        .route("/api/devices/:dev_eui/room", put(handlers::assign_device_room))
        .route("/api/measurements", get(handlers::list_measurements))
        .route("/api/measurements/chart", get(handlers::chart))
        .route("/api/measurements/cleanup", delete(handlers::cleanup))
        .route("/api/sensor-types", get(handlers::sensor_types))
        .route("/api/webhook/ttn", post(handlers::webhook_ttn))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!("http", method = %req.method(), uri = %req.uri())
            }),
        )
        .layer(CorsLayer::permissive())
}
