//! Admin-plane configuration (spec §6 "Environment", SPEC_FULL.md §2.3).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_config_dir")]
    pub config_dir: PathBuf,
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "d_audit_path")]
    pub audit_path: String,
    /// Empty until `/setup` is called for the first time.
    #[serde(default)]
    pub admin_token: String,
}

fn d_host() -> String {
    "0.0.0.0".to_string()
}
fn d_port() -> u16 {
    8090
}
fn d_config_dir() -> PathBuf {
    PathBuf::from(std::env::var("OPENPALM_CONFIG_HOME").unwrap_or_else(|_| "./data/config".to_string()))
}
fn d_state_dir() -> PathBuf {
    PathBuf::from(std::env::var("OPENPALM_STATE_HOME").unwrap_or_else(|_| "./data/state".to_string()))
}
fn d_audit_path() -> String {
    "./data/state/audit/admin.jsonl".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            config_dir: d_config_dir(),
            state_dir: d_state_dir(),
            audit_path: d_audit_path(),
            admin_token: String::new(),
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

impl AdminConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config: AdminConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            AdminConfig::default()
        };

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = token;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.admin_token.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "no admin token configured — /setup is open until one is set".into(),
            });
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = AdminConfig::default();
        assert_eq!(cfg.port, 8090);
        assert!(cfg.admin_token.is_empty());
    }

    #[test]
    fn validate_warns_when_no_token_set() {
        let cfg = AdminConfig::default();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Warning));
    }
}
