//! Automation descriptor and execution-log types (spec §3, §4.7).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXECUTION_LOG_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionKind {
    /// HTTP request to `http://localhost:<admin-port><path>` with
    /// `x-admin-token` auto-injected.
    Api {
        path: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        timeout: Option<u64>,
    },
    /// Arbitrary URL, no auto-auth.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        timeout: Option<u64>,
    },
    /// `command[0]` is the program, `command[1..]` is argv — never
    /// shell-interpolated.
    Shell {
        command: Vec<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl ActionKind {
    pub fn timeout_secs(&self) -> u64 {
        let explicit = match self {
            ActionKind::Api { timeout, .. } | ActionKind::Http { timeout, .. } => *timeout,
            ActionKind::Shell { timeout, .. } => *timeout,
        };
        explicit.unwrap_or(30)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Log and keep the automation enabled for its next fire.
    Ignore,
    /// Disable the automation after a failed run until re-enabled.
    Disable,
}

impl Default for OnFailure {
    fn default() -> Self {
        OnFailure::Ignore
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Source file name under `<state>/automations/`; not part of the YAML
    /// body itself, populated by the loader.
    #[serde(skip)]
    pub file_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub schedule: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub action: ActionKind,
    #[serde(default)]
    pub on_failure: OnFailure,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub at: DateTime<Utc>,
    pub ok: bool,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Bounded, newest-last execution history for a single automation.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLogRing {
    entries: VecDeque<ExecutionLogEntry>,
}

impl ExecutionLogRing {
    pub fn push(&mut self, entry: ExecutionLogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > EXECUTION_LOG_CAP {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ExecutionLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_caps_at_fifty_dropping_oldest() {
        let mut ring = ExecutionLogRing::default();
        for i in 0..60 {
            ring.push(ExecutionLogEntry {
                at: Utc::now(),
                ok: true,
                duration_ms: i,
                error: None,
            });
        }
        assert_eq!(ring.len(), EXECUTION_LOG_CAP);
        let first = ring.entries().next().unwrap();
        assert_eq!(first.duration_ms, 10);
    }

    #[test]
    fn action_kind_default_timeout_is_30s() {
        let action = ActionKind::Api {
            path: "/health".to_string(),
            method: "POST".to_string(),
            body: None,
            timeout: None,
        };
        assert_eq!(action.timeout_secs(), 30);
    }

    #[test]
    fn action_kind_explicit_timeout_overrides_default() {
        let action = ActionKind::Shell {
            command: vec!["true".to_string()],
            timeout: Some(5),
        };
        assert_eq!(action.timeout_secs(), 5);
    }

    #[test]
    fn deserializes_shell_action_with_argv() {
        let yaml = r#"
name: test
schedule: "*/5 * * * *"
action:
  type: shell
  command: ["echo", "hi; rm -rf /"]
"#;
        let config: AutomationConfig = serde_yaml::from_str(yaml).unwrap();
        match config.action {
            ActionKind::Shell { command, .. } => {
                assert_eq!(command[0], "echo");
                assert_eq!(command[1], "hi; rm -rf /");
            }
            _ => panic!("expected shell action"),
        }
    }

    #[test]
    fn defaults_apply_when_fields_omitted() {
        let yaml = r#"
name: test
schedule: "@daily"
action:
  type: http
  url: "https://example.com"
"#;
        let config: AutomationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.timezone, "UTC");
        assert!(config.enabled);
        assert_eq!(config.on_failure, OnFailure::Ignore);
    }
}
