//! Shared channel adapter configuration (spec §4.2 "Startup").

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Adapter identity, e.g. `"api"`, `"a2a"`, `"chat"` — matches the
    /// `channel` field every forwarded payload carries.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub guardian_url: String,
    /// Shared secret used to sign outgoing payloads toward the guardian.
    pub shared_secret: String,
    /// Optional bearer token this adapter itself requires from callers.
    pub bearer_token: Option<String>,
    pub forward_timeout: Duration,
}

impl ChannelConfig {
    /// Build config from environment variables, following the naming
    /// convention in spec §6: `CHANNEL_<NAME>_SECRET`, `GUARDIAN_URL`.
    ///
    /// Refuses to start (returns `Err`) if the shared secret env var is
    /// empty, per spec §4.2 "Startup".
    pub fn from_env(name: &str, default_port: u16) -> Result<Self, String> {
        let env_key = format!("CHANNEL_{}_SECRET", name.to_uppercase());
        let shared_secret = std::env::var(&env_key).unwrap_or_default();
        if shared_secret.is_empty() {
            return Err(format!(
                "{env_key} is empty — refusing to start channel adapter '{name}'"
            ));
        }

        let guardian_url =
            std::env::var("GUARDIAN_URL").unwrap_or_else(|_| "http://localhost:8088".to_string());
        let bearer_token = std::env::var(format!("CHANNEL_{}_BEARER", name.to_uppercase()))
            .ok()
            .filter(|s| !s.is_empty());
        let port = std::env::var(format!("CHANNEL_{}_PORT", name.to_uppercase()))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_port);

        Ok(Self {
            name: name.to_string(),
            host: "0.0.0.0".to_string(),
            port,
            guardian_url,
            shared_secret,
            bearer_token,
            forward_timeout: Duration::from_secs(120),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_refuses_empty_secret() {
        // SAFETY: test-only, single-threaded env mutation scoped to this test.
        unsafe {
            std::env::remove_var("CHANNEL_TESTADAPTER_SECRET");
        }
        let result = ChannelConfig::from_env("testadapter", 9000);
        assert!(result.is_err());
    }

    #[test]
    fn from_env_accepts_nonempty_secret() {
        unsafe {
            std::env::set_var("CHANNEL_TESTADAPTER2_SECRET", "x".repeat(32));
        }
        let result = ChannelConfig::from_env("testadapter2", 9000);
        assert!(result.is_ok());
        unsafe {
            std::env::remove_var("CHANNEL_TESTADAPTER2_SECRET");
        }
    }
}
