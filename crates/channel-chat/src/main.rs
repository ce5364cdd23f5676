//! Generic chat-webhook channel adapter (spec §4.2, §6: `POST /inbound`
//! with bearer auth, passthrough reply envelope).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

use op_channel::{build_payload, forward, ChannelConfig, ForwardError};

const IDENTITY: &str = "channel-chat";

#[derive(Clone)]
struct AppState {
    config: Arc<ChannelConfig>,
    http: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = ChannelConfig::from_env("chat", 8083).map_err(|e| anyhow::anyhow!(e))?;
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "channel-chat starting");

    let state = AppState {
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/inbound", post(inbound))
        .layer(RequestBodyLimitLayer::new(op_channel::limits::MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    op_channel::health::health(IDENTITY).await
}

#[derive(Debug, Deserialize)]
struct InboundRequest {
    #[serde(rename = "userId")]
    user_id: String,
    text: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn inbound(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<InboundRequest>) -> Response {
    if !op_channel::auth::check_bearer(&headers, state.config.bearer_token.as_deref()) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid or missing bearer token");
    }

    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    let payload = build_payload(req.user_id, "chat", req.text, req.metadata);

    let reply = match forward(&state.http, &state.config, &payload).await {
        Ok(r) => r,
        Err(ForwardError::GuardianError { status, body }) => {
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("guardian request failed")
                .to_string();
            let resp_status = if status >= 500 {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            };
            return error_response(resp_status, message);
        }
        Err(e) => return error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    };

    Json(serde_json::json!({
        "answer": reply.answer,
        "requestId": reply.request_id,
        "sessionId": reply.session_id,
        "userId": reply.user_id,
    }))
    .into_response()
}
