//! REST client for the LLM-backed assistant backend (spec §4.3 "Assistant
//! client"). The assistant itself is an external black box; this crate
//! only knows the two calls the guardian needs: create a session, then
//! send a message and read the reply.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assistant returned non-2xx status {0}")]
    Status(u16),
    #[error("malformed assistant response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    title: &'a str,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    parts: Vec<MessagePart<'a>>,
}

#[derive(Serialize)]
struct MessagePart<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    #[allow(dead_code)]
    info: serde_json::Value,
    parts: Vec<ReplyPart>,
}

#[derive(Deserialize)]
struct ReplyPart {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Configuration for reaching the assistant backend.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub base_url: String,
    pub create_timeout: Duration,
    pub message_timeout: Duration,
    pub basic_auth: Option<(String, String)>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            create_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(120),
            basic_auth: None,
        }
    }
}

pub struct AssistantClient {
    config: AssistantConfig,
    http: reqwest::Client,
    session_id_re: Regex,
}

impl AssistantClient {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            session_id_re: Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"),
        }
    }

    /// `POST <assistant>/session` — create a fresh conversation session.
    /// The returned id is validated against `[A-Za-z0-9_-]+` so a
    /// malformed backend response can never be smuggled into downstream
    /// URLs (spec §4.3).
    pub async fn create_session(&self, title: &str) -> Result<String> {
        let url = format!("{}/session", self.config.base_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(&url)
            .timeout(self.config.create_timeout)
            .json(&CreateSessionRequest { title });
        if let Some((user, pass)) = &self.config.basic_auth {
            req = req.basic_auth(user, Some(pass));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }
        let body: CreateSessionResponse = resp
            .json()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;

        if !self.session_id_re.is_match(&body.id) {
            return Err(Error::Malformed(format!(
                "session id {:?} does not match [A-Za-z0-9_-]+",
                body.id
            )));
        }
        Ok(body.id)
    }

    /// `POST <assistant>/session/<id>/message` — send the user's text and
    /// return the joined text of every `text` part in the reply.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<String> {
        let url = format!(
            "{}/session/{}/message",
            self.config.base_url.trim_end_matches('/'),
            session_id
        );
        let mut req = self
            .http
            .post(&url)
            .timeout(self.config.message_timeout)
            .json(&SendMessageRequest {
                parts: vec![MessagePart { kind: "text", text }],
            });
        if let Some((user, pass)) = &self.config.basic_auth {
            req = req.basic_auth(user, Some(pass));
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(Error::Status(resp.status().as_u16()));
        }
        let body: SendMessageResponse = resp
            .json()
            .await
            .map_err(|e| Error::Malformed(e.to_string()))?;

        let joined = body
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeouts() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.create_timeout, Duration::from_secs(10));
        assert_eq!(cfg.message_timeout, Duration::from_secs(120));
    }

    #[test]
    fn session_id_regex_accepts_expected_shapes() {
        let client = AssistantClient::new(AssistantConfig::default());
        assert!(client.session_id_re.is_match("abc123"));
        assert!(client.session_id_re.is_match("abc_123-XYZ"));
        assert!(!client.session_id_re.is_match("abc 123"));
        assert!(!client.session_id_re.is_match("abc/123"));
        assert!(!client.session_id_re.is_match(""));
    }
}
