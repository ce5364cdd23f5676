//! Shared control-plane state, mirroring the guardian's `AppState`
//! pattern: everything handlers touch concurrently lives behind an `Arc`
//! or a lock so the struct itself is cheap to clone per request.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use op_audit::AuditLog;

use crate::admin::config::AdminConfig;
use crate::scheduler::Scheduler;
use crate::spec::StackSpec;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AdminConfig>,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub spec: Arc<Mutex<StackSpec>>,
    pub audit: Arc<AuditLog>,
    /// `None` until `/setup` is called for the first time (spec §4.9
    /// "First-boot exception").
    pub admin_token_hash: Arc<Mutex<Option<[u8; 32]>>>,
    pub scheduler: Arc<Mutex<Scheduler>>,
}

impl AppState {
    pub fn new(config: AdminConfig) -> anyhow::Result<Self> {
        let audit = AuditLog::open(&config.audit_path)?;
        let spec_path = config.config_dir.join("openpalm.yaml");
        let spec = if spec_path.exists() {
            StackSpec::load(&spec_path)?
        } else {
            StackSpec::default()
        };

        let admin_token_hash = if config.admin_token.is_empty() {
            None
        } else {
            Some(hash_token(&config.admin_token))
        };

        let mut scheduler = Scheduler::new(config.state_dir.clone(), config.port, config.admin_token.clone());
        scheduler.start();

        Ok(Self {
            config_dir: config.config_dir.clone(),
            state_dir: config.state_dir.clone(),
            config: Arc::new(config),
            spec: Arc::new(Mutex::new(spec)),
            audit: Arc::new(audit),
            admin_token_hash: Arc::new(Mutex::new(admin_token_hash)),
            scheduler: Arc::new(Mutex::new(scheduler)),
        })
    }
}

pub fn hash_token(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic_and_sensitive_to_input() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
