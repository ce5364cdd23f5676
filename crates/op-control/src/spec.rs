//! Stack spec — the declarative configuration the renderer, channel
//! installer and admin API all operate on (spec §3 "Stack spec").

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Bind-address policy. Selects whether rendered services listen on
/// loopback only or on all interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    Host,
    Lan,
    Public,
}

impl AccessScope {
    /// The bind address every derived env var gets for this scope.
    pub fn bind_address(&self) -> &'static str {
        match self {
            AccessScope::Host => "127.0.0.1",
            AccessScope::Lan | AccessScope::Public => "0.0.0.0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInstance {
    pub name: String,
    /// Env-var assignments layered on top of the channel's template env file.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSpec {
    /// Core services always present (guardian, assistant, proxy, …).
    #[serde(default = "default_core_services")]
    pub core_services: Vec<String>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelInstance>,
    pub access_scope: AccessScope,
    #[serde(default = "default_ingress_port")]
    pub ingress_port: u16,
}

fn default_core_services() -> Vec<String> {
    vec!["guardian".to_string(), "assistant".to_string(), "proxy".to_string()]
}

fn default_ingress_port() -> u16 {
    80
}

impl Default for StackSpec {
    fn default() -> Self {
        Self {
            core_services: default_core_services(),
            channels: BTreeMap::new(),
            access_scope: AccessScope::Host,
            ingress_port: default_ingress_port(),
        }
    }
}

impl StackSpec {
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let spec: Self = serde_yaml::from_str(&raw).map_err(|e| crate::error::Error::Parse(e.to_string()))?;
        Ok(spec)
    }

    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let raw = serde_yaml::to_string(self).map_err(|e| crate::error::Error::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn channel_service_name(channel: &str) -> String {
        format!("channel-{channel}")
    }

    /// Channel secret table derived from this spec's channel env blocks,
    /// keyed by channel name. The renderer never embeds these literally.
    pub fn channel_secrets(&self) -> HashMap<String, String> {
        self.channels
            .iter()
            .filter_map(|(name, inst)| inst.env.get("SECRET").map(|s| (name.clone(), s.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_scope_bind_address() {
        assert_eq!(AccessScope::Host.bind_address(), "127.0.0.1");
        assert_eq!(AccessScope::Lan.bind_address(), "0.0.0.0");
        assert_eq!(AccessScope::Public.bind_address(), "0.0.0.0");
    }

    #[test]
    fn default_spec_has_core_services_and_host_scope() {
        let spec = StackSpec::default();
        assert!(spec.core_services.contains(&"guardian".to_string()));
        assert_eq!(spec.access_scope, AccessScope::Host);
        assert_eq!(spec.ingress_port, 80);
    }

    #[test]
    fn channel_service_name_convention() {
        assert_eq!(StackSpec::channel_service_name("chat"), "channel-chat");
    }

    #[test]
    fn load_missing_file_returns_default() {
        let spec = StackSpec::load(std::path::Path::new("/nonexistent/openpalm.yaml")).unwrap();
        assert_eq!(spec.ingress_port, 80);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openpalm.yaml");
        let mut spec = StackSpec::default();
        spec.ingress_port = 8443;
        spec.access_scope = AccessScope::Lan;
        spec.save(&path).unwrap();

        let loaded = StackSpec::load(&path).unwrap();
        assert_eq!(loaded.ingress_port, 8443);
        assert_eq!(loaded.access_scope, AccessScope::Lan);
    }
}
