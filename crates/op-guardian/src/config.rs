//! Guardian configuration — loaded from TOML with environment overrides
//! for secrets (spec §6 "Environment", SPEC_FULL.md §2.3).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default)]
    pub assistant: AssistantSection,
    #[serde(default = "d_audit_path")]
    pub audit_path: String,
    /// Channel name -> shared secret. Populated from `[channels]` in the
    /// config file, then overridden by `CHANNEL_<NAME>_SECRET` env vars
    /// (spec §6, §3 "Channel secret table").
    #[serde(default)]
    pub channels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSection {
    #[serde(default = "d_assistant_url")]
    pub base_url: String,
    #[serde(default = "d_message_timeout_secs")]
    pub message_timeout_secs: u64,
}

impl Default for AssistantSection {
    fn default() -> Self {
        Self {
            base_url: d_assistant_url(),
            message_timeout_secs: d_message_timeout_secs(),
        }
    }
}

fn d_host() -> String {
    "0.0.0.0".to_string()
}
fn d_port() -> u16 {
    8088
}
fn d_audit_path() -> String {
    "./data/state/audit/guardian.jsonl".to_string()
}
fn d_assistant_url() -> String {
    std::env::var("GUARDIAN_URL").unwrap_or_else(|_| "http://localhost:4000".to_string())
}
fn d_message_timeout_secs() -> u64 {
    120
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            assistant: AssistantSection::default(),
            audit_path: d_audit_path(),
            channels: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl GuardianConfig {
    /// Load from a TOML file at `path` (or defaults if absent), then
    /// layer `CHANNEL_<NAME>_SECRET` environment overrides on top (spec
    /// §6: "Secrets file overrides process env when present" — here the
    /// config file IS the secrets source of truth; env vars fill gaps for
    /// channels not yet in the file).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config: GuardianConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            GuardianConfig::default()
        };

        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix("CHANNEL_").and_then(|s| s.strip_suffix("_SECRET")) {
                config
                    .channels
                    .entry(name.to_lowercase())
                    .or_insert(value);
            }
        }

        Ok(config)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.assistant.message_timeout_secs)
    }

    /// Config validation with severities (SPEC_FULL.md §3).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.channels.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "no channel secrets configured — all inbound requests will be rejected as channel_not_configured".into(),
            });
        }
        for (name, secret) in &self.channels {
            if secret.len() * 8 < 128 {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    message: format!("channel '{name}' secret is below the 128-bit entropy floor"),
                });
            }
        }
        issues
    }
}
