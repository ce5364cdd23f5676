//! Agent-to-Agent (A2A) JSON-RPC channel adapter (spec §4.2, §6:
//! `POST /a2a` method `tasks/send`, `GET /.well-known/agent.json`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use op_channel::{build_payload, forward, ChannelConfig, ForwardError};

const IDENTITY: &str = "channel-a2a";
const JSONRPC_SERVER_ERROR: i64 = -32000;

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

    let config = ChannelConfig::from_env("a2a", 8082).map_err(|e| anyhow::anyhow!(e))?;
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "channel-a2a starting");

    let state = AppState {
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/.well-known/agent.json", get(agent_card))
        .route("/a2a", post(a2a_rpc))
        .layer(RequestBodyLimitLayer::new(op_channel::limits::MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    op_channel::health::health(IDENTITY).await
}

/// Minimal agent discovery card; enough for A2A clients to find the
/// `tasks/send` capability at `/a2a`.
async fn agent_card() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "openpalm",
        "description": "OpenPalm personal assistant, reachable over the A2A protocol",
        "url": "/a2a",
        "capabilities": { "streaming": false },
        "skills": [{ "id": "assistant", "name": "assistant" }],
    }))
}

// ── JSON-RPC request / response shapes ──────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct TaskSendParams {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<TaskMessage>,
}

#[derive(Debug, Deserialize)]
struct TaskMessage {
    #[serde(default)]
    parts: Vec<TaskPart>,
}

#[derive(Debug, Deserialize)]
struct TaskPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct RpcError {
    jsonrpc: &'static str,
    id: Value,
    error: RpcErrorBody,
}

#[derive(Serialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Response {
    Json(RpcError {
        jsonrpc: "2.0",
        id,
        error: RpcErrorBody {
            code,
            message: message.into(),
        },
    })
    .into_response()
}

/// Extract the first `{type:"text", text}` part, joined with newlines if
/// more than one is present.
fn extract_text(params: &Value) -> Option<String> {
    let parsed: TaskSendParams = serde_json::from_value(params.clone()).ok()?;
    let text = parsed
        .message?
        .parts
        .iter()
        .filter(|p| p.kind == "text")
        .filter_map(|p| p.text.clone())
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Caller-supplied task id, if `params.id` was set (spec §3/§6: `taskId`
/// metadata hint, `result.id` in the A2A reply).
fn extract_task_id(params: &Value) -> Option<String> {
    let parsed: TaskSendParams = serde_json::from_value(params.clone()).ok()?;
    parsed.id
}

async fn a2a_rpc(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<RpcRequest>) -> Response {
    if !op_channel::auth::check_bearer(&headers, state.config.bearer_token.as_deref()) {
        return rpc_error(req.id, JSONRPC_SERVER_ERROR, "invalid or missing bearer token");
    }

    if req.jsonrpc != "2.0" {
        return rpc_error(req.id, -32600, "invalid request: jsonrpc must be \"2.0\"");
    }

    if req.method != "tasks/send" {
        return rpc_error(req.id, -32601, format!("method not found: {}", req.method));
    }

    let text = match extract_text(&req.params) {
        Some(t) => t,
        None => return rpc_error(req.id, -32602, "invalid params: no text part in message"),
    };

    let task_id = extract_task_id(&req.params).unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut metadata = HashMap::new();
    metadata.insert("rpcId".to_string(), req.id.clone());
    metadata.insert("taskId".to_string(), Value::String(task_id.clone()));

    let payload = build_payload("a2a-caller", "a2a", text, metadata);

    let reply = match forward(&state.http, &state.config, &payload).await {
        Ok(r) => r,
        Err(ForwardError::GuardianError { status, body }) => {
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("guardian request failed")
                .to_string();
            let code = if status >= 500 { JSONRPC_SERVER_ERROR } else { -32000 - status as i64 };
            return rpc_error(req.id, code, message);
        }
        Err(e) => return rpc_error(req.id, JSONRPC_SERVER_ERROR, e.to_string()),
    };

    Json(serde_json::json!({
        "jsonrpc": "2.0",
        "id": req.id,
        "result": {
            "id": task_id,
            "status": { "state": "completed" },
            "artifacts": [{ "parts": [{ "type": "text", "text": reply.answer }] }],
        }
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_text_part() {
        let params = serde_json::json!({
            "message": { "parts": [{"type": "text", "text": "hello"}] }
        });
        assert_eq!(extract_text(&params), Some("hello".to_string()));
    }

    #[test]
    fn joins_multiple_text_parts() {
        let params = serde_json::json!({
            "message": { "parts": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ]}
        });
        assert_eq!(extract_text(&params), Some("line one\nline two".to_string()));
    }

    #[test]
    fn missing_message_returns_none() {
        let params = serde_json::json!({});
        assert_eq!(extract_text(&params), None);
    }

    #[test]
    fn empty_text_part_returns_none() {
        let params = serde_json::json!({
            "message": { "parts": [{"type": "text", "text": "   "}] }
        });
        assert_eq!(extract_text(&params), None);
    }

    #[test]
    fn extracts_caller_supplied_task_id() {
        let params = serde_json::json!({
            "id": "task-123",
            "message": { "parts": [{"type": "text", "text": "hi"}] }
        });
        assert_eq!(extract_task_id(&params), Some("task-123".to_string()));
    }

    #[test]
    fn missing_task_id_returns_none() {
        let params = serde_json::json!({
            "message": { "parts": [{"type": "text", "text": "hi"}] }
        });
        assert_eq!(extract_task_id(&params), None);
    }
}
