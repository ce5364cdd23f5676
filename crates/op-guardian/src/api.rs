//! Guardian HTTP surface: `GET /health`, `POST /channel/inbound` (spec §6).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use op_audit::AuditRecord;
use op_payload::SignedChannelPayload;

use crate::error::{error_response, GuardianError};
use crate::nonce::NonceCheck;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channel/inbound", post(inbound))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    time: String,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: "guardian",
        time: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
struct InboundResponse {
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(rename = "sessionId")]
    session_id: String,
    answer: String,
    #[serde(rename = "userId")]
    user_id: String,
}

/// `POST /channel/inbound` — the guardian ingress pipeline (spec §4.3).
/// Every step is checked in order; the first failure is terminal and is
/// both returned to the caller and written to the audit log.
async fn inbound(State(state): State<AppState>, headers: HeaderMap, raw_body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();

    // 1. Parse.
    let payload: SignedChannelPayload = match serde_json::from_slice(&raw_body) {
        Ok(p) => p,
        Err(_) => return deny(&state, &request_id, None, None, GuardianError::InvalidJson),
    };

    // 2. Validate payload.
    if let Err(validation_err) = op_payload::validate(&payload) {
        return deny(
            &state,
            &request_id,
            Some(&payload.channel),
            Some(&payload.user_id),
            GuardianError::Validation(validation_err.kind()),
        );
    }

    // 3. Look up channel secret.
    let secret = match state.config.channels.get(&payload.channel) {
        Some(s) => s,
        None => {
            return deny(
                &state,
                &request_id,
                Some(&payload.channel),
                Some(&payload.user_id),
                GuardianError::ChannelNotConfigured,
            )
        }
    };

    // 4. Verify signature over the raw body bytes.
    let signature_header = headers
        .get("x-channel-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !op_crypto::verify(secret, &raw_body, signature_header) {
        return deny(
            &state,
            &request_id,
            Some(&payload.channel),
            Some(&payload.user_id),
            GuardianError::InvalidSignature,
        );
    }

    // 5. Nonce / timestamp replay check.
    match state.nonces.check_and_insert(&payload.nonce, payload.timestamp) {
        NonceCheck::Accepted => {}
        NonceCheck::StaleTimestamp | NonceCheck::ReplayedNonce => {
            return deny(
                &state,
                &request_id,
                Some(&payload.channel),
                Some(&payload.user_id),
                GuardianError::ReplayDetected,
            );
        }
    }

    // 6. Rate limit both axes.
    let channel_key = format!("ch:{}", payload.channel);
    let user_ok = state.user_limiter.check(&payload.user_id);
    let channel_ok = state.channel_limiter.check(&channel_key);
    if !user_ok || !channel_ok {
        return deny(
            &state,
            &request_id,
            Some(&payload.channel),
            Some(&payload.user_id),
            GuardianError::RateLimited,
        );
    }

    // 8. Forward to assistant: create session, then post message.
    let title = format!("{}:{}", payload.channel, payload.user_id);
    let session_id = match state.assistant.create_session(&title).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "assistant session creation failed");
            return deny(
                &state,
                &request_id,
                Some(&payload.channel),
                Some(&payload.user_id),
                GuardianError::AssistantUnavailable,
            );
        }
    };

    let answer = match state.assistant.send_message(&session_id, &payload.text).await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "assistant message send failed");
            return deny(
                &state,
                &request_id,
                Some(&payload.channel),
                Some(&payload.user_id),
                GuardianError::AssistantUnavailable,
            );
        }
    };

    // 7/9. Audit the accepted inbound and return the reply.
    state.audit.append(
        &AuditRecord::new("guardian", "channel.inbound", "ok")
            .with_request_id(request_id.clone())
            .with_session_id(session_id.clone())
            .with("channel", &payload.channel)
            .with("userId", &payload.user_id),
    );

    Json(InboundResponse {
        request_id,
        session_id,
        answer,
        user_id: payload.user_id,
    })
    .into_response()
}

fn deny(
    state: &AppState,
    request_id: &str,
    channel: Option<&str>,
    user_id: Option<&str>,
    err: GuardianError,
) -> Response {
    let mut record = AuditRecord::new("guardian", "channel.inbound", err.audit_status())
        .with_request_id(request_id.to_string())
        .with("reason", err.http_parts().1);
    if let Some(c) = channel {
        record = record.with("channel", c);
    }
    if let Some(u) = user_id {
        record = record.with("userId", u);
    }
    state.audit.append(&record);

    tracing::warn!(
        request_id = %request_id,
        reason = err.http_parts().1,
        "guardian rejected inbound request"
    );

    error_response(&err, Some(request_id.to_string()))
}

/// `GET /<unknown>` fallback — spec §6 lists `404 not_found` among
/// guardian responses.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not_found" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::GuardianConfig::default();
        config.audit_path = dir.path().join("audit.jsonl").to_string_lossy().to_string();
        config.channels.insert("api".to_string(), "x".repeat(32));
        // Leak the tempdir so it stays alive for the test's duration.
        std::mem::forget(dir);
        AppState::new(config).unwrap()
    }

    fn signed_body(secret: &str, channel: &str, nonce: &str, ts: i64) -> (Vec<u8>, String) {
        let payload = serde_json::json!({
            "userId": "alice",
            "channel": channel,
            "text": "hi",
            "metadata": {},
            "nonce": nonce,
            "timestamp": ts,
        });
        let body = serde_json::to_vec(&payload).unwrap();
        let sig = op_crypto::sign(secret, &body);
        (body, sig)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_json_returns_400() {
        let app = router(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/channel/inbound")
                    .header("x-channel-signature", "00")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bad_signature_returns_403() {
        let app = router(test_state());
        let (body, _sig) = signed_body(&"x".repeat(32), "api", "n1", Utc::now().timestamp_millis());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/channel/inbound")
                    .header("content-type", "application/json")
                    .header("x-channel-signature", "0".repeat(64))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_channel_returns_403() {
        let app = router(test_state());
        let (body, sig) = signed_body("whatever-secret-value-1234567890", "unknown", "n1", Utc::now().timestamp_millis());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/channel/inbound")
                    .header("content-type", "application/json")
                    .header("x-channel-signature", sig)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
