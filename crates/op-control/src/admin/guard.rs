//! `AdminGuard` — Axum extractor enforcing the `x-admin-token` header
//! (spec §4.9: "Every admin mutation requires header `x-admin-token`").
//!
//! Unlike a dev-mode bypass, an unset token only opens `/admin/setup`
//! (the spec's "first-boot exception"); every other route always
//! requires a match once reached, so `AdminGuard::from_request_parts`
//! rejects outright when no token has been configured yet.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::admin::state::AppState;

pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = state.admin_token_hash.lock();
        let Some(expected) = expected_hash.as_ref() else {
            return Err(unauthorized("admin token not yet configured; call /setup first"));
        };

        let provided = parts
            .headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected)) {
            return Err(unauthorized("invalid admin token"));
        }
        Ok(AdminGuard)
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "unauthorized", "message": message })),
    )
}

/// Derive `(actor, caller_type)` from request headers (spec §4.9 step b).
pub fn actor_info(headers: &axum::http::HeaderMap) -> (String, String) {
    let actor = headers
        .get("x-requested-by")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let caller_type = if headers.get("x-requested-by").is_some() {
        "operator".to_string()
    } else if headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.to_ascii_lowercase().contains("curl"))
        .unwrap_or(false)
    {
        "cli".to_string()
    } else {
        "unknown".to_string()
    };

    (actor, caller_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn actor_defaults_to_anonymous_without_header() {
        let headers = HeaderMap::new();
        let (actor, caller_type) = actor_info(&headers);
        assert_eq!(actor, "anonymous");
        assert_eq!(caller_type, "unknown");
    }

    #[test]
    fn actor_reads_x_requested_by() {
        let mut headers = HeaderMap::new();
        headers.insert("x-requested-by", "alice".parse().unwrap());
        let (actor, caller_type) = actor_info(&headers);
        assert_eq!(actor, "alice");
        assert_eq!(caller_type, "operator");
    }

    #[test]
    fn actor_infers_cli_from_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "curl/8.0".parse().unwrap());
        let (_, caller_type) = actor_info(&headers);
        assert_eq!(caller_type, "cli");
    }
}
