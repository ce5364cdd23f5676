//! Shared guardian state — every axum handler clones this cheaply
//! (everything inside is an `Arc`), mirroring the teacher's `AppState`
//! pattern (`sa_gateway::state::AppState`).

use std::sync::Arc;

use op_assistant::{AssistantClient, AssistantConfig};
use op_audit::AuditLog;

use crate::config::GuardianConfig;
use crate::nonce::NonceCache;
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GuardianConfig>,
    pub nonces: Arc<NonceCache>,
    pub user_limiter: Arc<RateLimiter>,
    pub channel_limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLog>,
    pub assistant: Arc<AssistantClient>,
}

impl AppState {
    pub fn new(config: GuardianConfig) -> anyhow::Result<Self> {
        let audit = AuditLog::open(&config.audit_path)?;
        let assistant = AssistantClient::new(AssistantConfig {
            base_url: config.assistant.base_url.clone(),
            message_timeout: config.message_timeout(),
            ..AssistantConfig::default()
        });

        Ok(Self {
            config: Arc::new(config),
            nonces: Arc::new(NonceCache::new()),
            user_limiter: Arc::new(RateLimiter::per_user()),
            channel_limiter: Arc::new(RateLimiter::per_channel()),
            audit: Arc::new(audit),
            assistant: Arc::new(assistant),
        })
    }
}
