//! Guardian error taxonomy and its mapping to HTTP responses (spec §4.3,
//! §6 "Guardian endpoints", §7 "Error handling design").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum GuardianError {
    InvalidJson,
    Validation(&'static str),
    ChannelNotConfigured,
    InvalidSignature,
    ReplayDetected,
    RateLimited,
    AssistantUnavailable,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl GuardianError {
    /// The `(status, kind)` pair from spec §6 "Guardian endpoints".
    pub fn http_parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidJson => (StatusCode::BAD_REQUEST, "invalid_json"),
            Self::Validation(kind) => (StatusCode::BAD_REQUEST, kind),
            Self::ChannelNotConfigured => (StatusCode::FORBIDDEN, "channel_not_configured"),
            Self::InvalidSignature => (StatusCode::FORBIDDEN, "invalid_signature"),
            Self::ReplayDetected => (StatusCode::CONFLICT, "replay_detected"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::AssistantUnavailable => (StatusCode::BAD_GATEWAY, "assistant_unavailable"),
        }
    }

    /// Whether this terminal outcome should be audited as `denied` vs.
    /// `error` (spec §4.3 steps 6, 8).
    pub fn audit_status(&self) -> &'static str {
        match self {
            Self::RateLimited => "denied",
            Self::AssistantUnavailable => "error",
            _ => "rejected",
        }
    }
}

/// Build the response body for a classified error, optionally attaching
/// a request id (spec §8 Scenario B: `{error, requestId}`).
pub fn error_response(err: &GuardianError, request_id: Option<String>) -> Response {
    let (status, kind) = err.http_parts();
    (
        status,
        Json(ErrorBody {
            error: kind,
            request_id,
        }),
    )
        .into_response()
}

impl IntoResponse for GuardianError {
    fn into_response(self) -> Response {
        error_response(&self, None)
    }
}
