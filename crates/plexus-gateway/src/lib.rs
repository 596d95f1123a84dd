//! # plexus-gateway
//!
//! HTTP/WebSocket front door to the broker:
//! - `POST /v1/bus/publish`: authenticated fire-and-forget publish
//! - `GET /v1/bus/ws`: upgrade to a multiplexed bus session that is
//!   pre-subscribed to every response topic the front-end consumes

pub mod api;
pub mod auth;
pub mod session;
pub mod state;

pub use api::create_router;
pub use auth::StaticTokenVerifier;
pub use state::AppState;
