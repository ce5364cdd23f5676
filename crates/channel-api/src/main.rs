//! OpenAI-compatible channel adapter (spec §4.2, §6 "Channel adapter
//! endpoints": `POST /v1/chat/completions`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

use op_channel::{build_payload, forward, ChannelConfig, ForwardError};

const IDENTITY: &str = "channel-api";

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

    let config = ChannelConfig::from_env("api", 8081).map_err(|e| anyhow::anyhow!(e))?;
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "channel-api starting");

    let state = AppState {
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(RequestBodyLimitLayer::new(op_channel::limits::MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    op_channel::health::health(IDENTITY).await
}

// ── Request / response shapes ───────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Serialize)]
struct Choice {
    index: u32,
    message: ResponseMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ResponseMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Scan `messages` newest-to-oldest; accept the first `role="user"` entry
/// with either string content or an array of `{type:"text", text}` parts
/// joined with newlines (spec §4.2 "Text extraction").
fn extract_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages.iter().rev().find(|m| m.role == "user").and_then(|m| {
        let text = match &m.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.clone())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

fn openai_error(status: StatusCode, error_type: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "message": message.into(), "type": error_type }
        })),
    )
        .into_response()
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    if !op_channel::auth::check_bearer(&headers, state.config.bearer_token.as_deref()) {
        return openai_error(StatusCode::UNAUTHORIZED, "auth_error", "invalid or missing bearer token");
    }

    if op_channel::limits::rejects_streaming(body.stream) {
        return openai_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "streaming responses are not supported",
        );
    }

    let text = match extract_user_text(&body.messages) {
        Some(t) => t,
        None => {
            return openai_error(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "no user message found in messages array",
            )
        }
    };

    let mut metadata = HashMap::new();
    metadata.insert("model".to_string(), serde_json::Value::String(body.model.clone()));

    // Identity here is a placeholder: real deployments derive it from the
    // caller's authenticated principal; this adapter uses a stable
    // per-process anonymous id since the OpenAI protocol carries none.
    let payload = build_payload("api-caller", "api", text, metadata);

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
            return openai_error(resp_status, "server_error", message);
        }
        Err(e) => {
            return openai_error(StatusCode::BAD_GATEWAY, "server_error", e.to_string());
        }
    };

    Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: chrono::Utc::now().timestamp(),
        model: body.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: reply.answer,
            },
            finish_reason: "stop",
        }],
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        },
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_newest_user_message_as_string() {
        let messages = vec![
            ChatMessage {
                role: "user".into(),
                content: MessageContent::Text("first".into()),
            },
            ChatMessage {
                role: "assistant".into(),
                content: MessageContent::Text("reply".into()),
            },
            ChatMessage {
                role: "user".into(),
                content: MessageContent::Text("second".into()),
            },
        ];
        assert_eq!(extract_user_text(&messages), Some("second".to_string()));
    }

    #[test]
    fn extracts_and_joins_array_parts() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart {
                    kind: "text".into(),
                    text: Some("line one".into()),
                },
                ContentPart {
                    kind: "text".into(),
                    text: Some("line two".into()),
                },
            ]),
        }];
        assert_eq!(extract_user_text(&messages), Some("line one\nline two".to_string()));
    }

    #[test]
    fn empty_content_returns_none() {
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: MessageContent::Text("   ".into()),
        }];
        assert_eq!(extract_user_text(&messages), None);
    }

    #[test]
    fn no_user_message_returns_none() {
        let messages = vec![ChatMessage {
            role: "assistant".into(),
            content: MessageContent::Text("hi".into()),
        }];
        assert_eq!(extract_user_text(&messages), None);
    }
}
