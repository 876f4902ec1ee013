//! WebSocket upgrade endpoint (§4.2 Upgrade, §6.1 `/v1/ws`).

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::connection::handle_socket;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    device: Option<String>,
}

/// Extract the bearer token from the `Authorization` header, falling back
/// to the `token` query parameter (§6.1).
fn extract_token(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    query.token.clone()
}

/// Client IP for `WS_RATE_LIMIT` (§6.3): per-IP upgrade attempts, not per
/// connected user. Prefers `X-Forwarded-For` for proxied deployments, since
/// the gateway typically sits behind a load balancer.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, addr);
    let limit = state.rate_limiter.check(&state.ws_rate_limit, &ip).await;
    if !limit.allowed {
        tracing::debug!(%ip, "websocket upgrade rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({ "code": "RATE_LIMITED" })),
        )
            .into_response();
    }

    let token = extract_token(&headers, &query).unwrap_or_default();

    let user_id = match state.verifier.verify(&token) {
        Ok(id) => id,
        Err(err) => {
            tracing::debug!(error = %err, "websocket upgrade rejected");
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "code": err.code() })),
            )
                .into_response();
        }
    };

    let device = query.device.clone().unwrap_or_else(|| "web".to_string());

    ws.on_upgrade(move |socket| handle_socket(state, socket, user_id, device))
}

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "cache unavailable"),
    }
}
