//! The signed channel payload — the single wire contract between channel
//! adapters and the guardian (spec §3 "Signed channel payload").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical signed-channel payload. All five primary fields are required;
/// `metadata` may be empty but must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedChannelPayload {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub channel: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub nonce: String,
    pub timestamp: i64,
}

/// Validation failure kind, matching the `<field>_missing` wire taxonomy
/// in spec §4.3 step 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("userId_missing")]
    UserIdMissing,
    #[error("channel_missing")]
    ChannelMissing,
    #[error("text_missing")]
    TextMissing,
    #[error("nonce_missing")]
    NonceMissing,
    #[error("timestamp_missing")]
    TimestampMissing,
}

impl ValidationError {
    /// The wire-level error kind string used in the 400 response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserIdMissing => "userId_missing",
            Self::ChannelMissing => "channel_missing",
            Self::TextMissing => "text_missing",
            Self::NonceMissing => "nonce_missing",
            Self::TimestampMissing => "timestamp_missing",
        }
    }
}

/// Validate that all required fields are present and non-empty, and that
/// `timestamp` looks like a real wall-clock value (spec §4.3 step 2).
///
/// Field order matches spec §3's listing, so the first violated
/// invariant is always reported deterministically.
pub fn validate(payload: &SignedChannelPayload) -> Result<(), ValidationError> {
    if payload.user_id.trim().is_empty() {
        return Err(ValidationError::UserIdMissing);
    }
    if payload.channel.trim().is_empty() {
        return Err(ValidationError::ChannelMissing);
    }
    if payload.text.trim().is_empty() {
        return Err(ValidationError::TextMissing);
    }
    if payload.nonce.trim().is_empty() {
        return Err(ValidationError::NonceMissing);
    }
    if payload.timestamp <= 0 {
        return Err(ValidationError::TimestampMissing);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> SignedChannelPayload {
        SignedChannelPayload {
            user_id: "alice".into(),
            channel: "api".into(),
            text: "hi".into(),
            metadata: HashMap::new(),
            nonce: "abc-123".into(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(validate(&valid_payload()).is_ok());
    }

    #[test]
    fn empty_user_id_fails() {
        let mut p = valid_payload();
        p.user_id = "".into();
        assert_eq!(validate(&p), Err(ValidationError::UserIdMissing));
    }

    #[test]
    fn whitespace_channel_fails() {
        let mut p = valid_payload();
        p.channel = "   ".into();
        assert_eq!(validate(&p), Err(ValidationError::ChannelMissing));
    }

    #[test]
    fn empty_text_fails() {
        let mut p = valid_payload();
        p.text = "".into();
        assert_eq!(validate(&p), Err(ValidationError::TextMissing));
    }

    #[test]
    fn empty_nonce_fails() {
        let mut p = valid_payload();
        p.nonce = "".into();
        assert_eq!(validate(&p), Err(ValidationError::NonceMissing));
    }

    #[test]
    fn zero_timestamp_fails() {
        let mut p = valid_payload();
        p.timestamp = 0;
        assert_eq!(validate(&p), Err(ValidationError::TimestampMissing));
    }

    #[test]
    fn roundtrips_through_json() {
        let p = valid_payload();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"userId\""));
        let back: SignedChannelPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, p.user_id);
        assert_eq!(back.timestamp, p.timestamp);
    }

    #[test]
    fn metadata_defaults_to_empty_map() {
        let json = serde_json::json!({
            "userId": "alice",
            "channel": "api",
            "text": "hi",
            "nonce": "n1",
            "timestamp": 1
        });
        let p: SignedChannelPayload = serde_json::from_value(json).unwrap();
        assert!(p.metadata.is_empty());
    }
}
