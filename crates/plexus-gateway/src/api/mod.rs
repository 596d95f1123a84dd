//! API routes

pub mod bus;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// GET /health
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/bus/publish", post(bus::publish))
        .route("/v1/bus/ws", get(bus::ws_gateway))
        .route("/health", get(health_check))
        .with_state(state)
}
