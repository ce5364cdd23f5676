//! Sign-and-forward to the guardian (spec §4.2 responsibility 5).

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use op_payload::SignedChannelPayload;

use crate::config::ChannelConfig;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("network error reaching guardian: {0}")]
    Network(#[from] reqwest::Error),
    #[error("guardian returned {status}: {body}")]
    GuardianError { status: u16, body: serde_json::Value },
    #[error("malformed guardian response: {0}")]
    Malformed(String),
}

impl ForwardError {
    /// `true` for 5xx responses — spec §4.2 step 7: "On guardian 5xx,
    /// wrap as protocol-native error."
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::GuardianError { status, .. } if *status >= 500)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardianReply {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub answer: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Build the outbound signed payload: attach a fresh nonce and the
/// current timestamp (spec §4.2 step 5).
pub fn build_payload(
    user_id: impl Into<String>,
    channel: impl Into<String>,
    text: impl Into<String>,
    metadata: HashMap<String, serde_json::Value>,
) -> SignedChannelPayload {
    SignedChannelPayload {
        user_id: user_id.into(),
        channel: channel.into(),
        text: text.into(),
        metadata,
        nonce: Uuid::new_v4().to_string(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// Sign `payload` with the adapter's shared secret and POST it to the
/// guardian's `/channel/inbound` endpoint.
pub async fn forward(
    http: &reqwest::Client,
    config: &ChannelConfig,
    payload: &SignedChannelPayload,
) -> Result<GuardianReply, ForwardError> {
    let body = serde_json::to_vec(payload).map_err(|e| ForwardError::Malformed(e.to_string()))?;
    let signature = op_crypto::sign(&config.shared_secret, &body);

    let url = format!("{}/channel/inbound", config.guardian_url.trim_end_matches('/'));
    let resp = http
        .post(&url)
        .timeout(config.forward_timeout)
        .header("content-type", "application/json")
        .header("x-channel-signature", signature)
        .body(body)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        return Err(ForwardError::GuardianError {
            status: status.as_u16(),
            body,
        });
    }

    resp.json::<GuardianReply>()
        .await
        .map_err(|e| ForwardError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_payload_fills_nonce_and_timestamp() {
        let payload = build_payload("alice", "api", "hi", HashMap::new());
        assert!(!payload.nonce.is_empty());
        assert!(payload.timestamp > 0);
        assert_eq!(payload.user_id, "alice");
    }

    #[test]
    fn two_payloads_get_distinct_nonces() {
        let a = build_payload("alice", "api", "hi", HashMap::new());
        let b = build_payload("alice", "api", "hi", HashMap::new());
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn server_error_detection() {
        let err = ForwardError::GuardianError {
            status: 502,
            body: serde_json::Value::Null,
        };
        assert!(err.is_server_error());
        let err = ForwardError::GuardianError {
            status: 403,
            body: serde_json::Value::Null,
        };
        assert!(!err.is_server_error());
    }
}
