//! Bus endpoints: fire-and-forget publish and the WebSocket gateway.

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::debug;

use plexus_bus::BusError;
use plexus_core::{new_id, Envelope};

use crate::auth;
use crate::session;
use crate::state::AppState;

/// POST /v1/bus/publish: decode, publish, 202.
pub async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let principal = auth::authenticate(state.verifier.as_ref(), &headers, None)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    let mut envelope =
        Envelope::from_slice(&body).map_err(|err| ApiError::BadRequest(err.to_string()))?;
    if envelope.id.is_empty() {
        envelope.id = new_id();
    }
    let mut meta = envelope.meta_view();
    meta.app_id = Some(principal.subject);
    envelope.meta = meta.merged_into(&envelope.meta);

    debug!(topic = %envelope.topic, id = %envelope.id, "http publish");
    state.broker.publish(envelope).await.map_err(|err| match err {
        BusError::EmptyTopicName => ApiError::BadRequest(err.to_string()),
        other => ApiError::Internal(other.to_string()),
    })?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// GET /v1/bus/ws: authenticate, then upgrade into a bus session.
pub async fn ws_gateway(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal =
        match auth::authenticate(state.verifier.as_ref(), &headers, query.token.as_deref()).await {
            Ok(principal) => principal,
            Err(_) => return ApiError::Unauthorized.into_response(),
        };

    let max_frame = state.config.session.max_frame_bytes;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| session::run(socket, state, principal))
}

/// Gateway-surface errors mapped to HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthenticated".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": "api_error",
            }
        });
        (status, Json(body)).into_response()
    }
}
