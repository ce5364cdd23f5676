//! Channel install / uninstall (spec §4.6). Both paths stage the config
//! change, re-render + apply the full artifact set, and roll back to the
//! exact pre-change bytes if staging fails.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::spec::{ChannelInstance, ServiceStatus, StackSpec};

/// Dispatches `compose up`/`compose stop` for a single channel service.
/// Real deployments shell out to the container runtime; tests use a stub.
pub trait ComposeRuntime {
    fn up(&self, service: &str) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
}

pub struct NullRuntime;

impl ComposeRuntime for NullRuntime {
    fn up(&self, _service: &str) -> Result<()> {
        Ok(())
    }
    fn stop(&self, _service: &str) -> Result<()> {
        Ok(())
    }
}

pub struct DockerComposeRuntime {
    pub compose_file: PathBuf,
}

impl ComposeRuntime for DockerComposeRuntime {
    fn up(&self, service: &str) -> Result<()> {
        run_compose(&self.compose_file, &["up", "-d", service])
    }
    fn stop(&self, service: &str) -> Result<()> {
        run_compose(&self.compose_file, &["stop", service])
    }
}

fn run_compose(compose_file: &Path, args: &[&str]) -> Result<()> {
    let output = std::process::Command::new("docker")
        .arg("compose")
        .arg("-f")
        .arg(compose_file)
        .args(args)
        .output()
        .map_err(|e| Error::Other(format!("failed to invoke docker compose: {e}")))?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "docker compose {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupAction {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupIntent {
    pub action: BackupAction,
    pub channel: String,
    pub timestamp: String,
}

fn backup_dir(state_dir: &Path, channel: &str) -> PathBuf {
    state_dir.join("config-backups").join(channel)
}

fn intent_path(state_dir: &Path, channel: &str) -> PathBuf {
    backup_dir(state_dir, channel).join("intent.json")
}

fn write_intent(state_dir: &Path, channel: &str, action: BackupAction) -> Result<()> {
    let dir = backup_dir(state_dir, channel);
    fs::create_dir_all(&dir)?;
    let intent = BackupIntent {
        action,
        channel: channel.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };
    fs::write(intent_path(state_dir, channel), serde_json::to_string_pretty(&intent)?)?;
    Ok(())
}

fn clear_backup(state_dir: &Path, channel: &str) -> Result<()> {
    let dir = backup_dir(state_dir, channel);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

fn channel_files(config_dir: &Path, channel: &str) -> (PathBuf, PathBuf) {
    let dir = config_dir.join("channels");
    (dir.join(format!("{channel}.yml")), dir.join(format!("{channel}.caddy")))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct InstallRequest {
    pub channel: String,
    pub yml_template: Vec<u8>,
    pub caddy_template: Vec<u8>,
}

/// Install a channel (spec §4.6 "Install"). `restage` re-renders and
/// applies the full artifact set against the mutated spec.
pub fn install(
    config_dir: &Path,
    state_dir: &Path,
    spec: &mut StackSpec,
    req: &InstallRequest,
    restage: impl FnOnce(&StackSpec) -> Result<()>,
    runtime: &dyn ComposeRuntime,
) -> Result<()> {
    write_intent(state_dir, &req.channel, BackupAction::Install)?;

    let (yml_path, caddy_path) = channel_files(config_dir, &req.channel);
    fs::create_dir_all(config_dir.join("channels"))?;
    fs::write(&yml_path, &req.yml_template)?;
    fs::write(&caddy_path, &req.caddy_template)?;

    let previous = spec.clone();
    let mut env = BTreeMap::new();
    env.insert("SECRET".to_string(), generate_secret());
    spec.channels.insert(
        req.channel.clone(),
        ChannelInstance {
            name: req.channel.clone(),
            env,
            status: ServiceStatus::Stopped,
        },
    );

    if let Err(e) = restage(spec) {
        let _ = fs::remove_file(&yml_path);
        let _ = fs::remove_file(&caddy_path);
        *spec = previous;
        return Err(e);
    }

    clear_backup(state_dir, &req.channel)?;
    runtime.up(&StackSpec::channel_service_name(&req.channel))
}

/// Uninstall a channel (spec §4.6 "Uninstall").
pub fn uninstall(
    config_dir: &Path,
    state_dir: &Path,
    spec: &mut StackSpec,
    channel: &str,
    restage: impl FnOnce(&StackSpec) -> Result<()>,
    runtime: &dyn ComposeRuntime,
) -> Result<()> {
    write_intent(state_dir, channel, BackupAction::Uninstall)?;

    let (yml_path, caddy_path) = channel_files(config_dir, channel);
    let backup_files_dir = backup_dir(state_dir, channel).join("files");
    fs::create_dir_all(&backup_files_dir)?;
    if yml_path.exists() {
        fs::copy(&yml_path, backup_files_dir.join(format!("{channel}.yml")))?;
    }
    if caddy_path.exists() {
        fs::copy(&caddy_path, backup_files_dir.join(format!("{channel}.caddy")))?;
    }

    let removed_instance = spec.channels.remove(channel);
    if yml_path.exists() {
        fs::remove_file(&yml_path)?;
    }
    if caddy_path.exists() {
        fs::remove_file(&caddy_path)?;
    }

    if let Err(e) = restage(spec) {
        if backup_files_dir.join(format!("{channel}.yml")).exists() {
            fs::copy(backup_files_dir.join(format!("{channel}.yml")), &yml_path)?;
        }
        if backup_files_dir.join(format!("{channel}.caddy")).exists() {
            fs::copy(backup_files_dir.join(format!("{channel}.caddy")), &caddy_path)?;
        }
        if let Some(instance) = removed_instance {
            spec.channels.insert(channel.to_string(), instance);
        }
        // Backup is NOT cleared on failure — it stays until rollback/retry succeeds.
        return Err(e);
    }

    clear_backup(state_dir, channel)?;
    runtime.stop(&StackSpec::channel_service_name(channel))
}

/// Startup recovery: for each backup recorded with `action=uninstall`, if
/// the channel file is now missing from config, restore it and report the
/// channel name for the caller to audit as `startup.stale_backup`.
pub fn cleanup_stale_config_backups(state_dir: &Path, config_dir: &Path) -> Result<Vec<String>> {
    let backups_root = state_dir.join("config-backups");
    if !backups_root.exists() {
        return Ok(Vec::new());
    }

    let mut restored = Vec::new();
    for entry in fs::read_dir(&backups_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let channel = entry.file_name().to_string_lossy().to_string();
        let intent_path = entry.path().join("intent.json");
        if !intent_path.exists() {
            continue;
        }
        let intent: BackupIntent = serde_json::from_str(&fs::read_to_string(&intent_path)?)?;
        if intent.action != BackupAction::Uninstall {
            continue;
        }

        let (yml_path, caddy_path) = channel_files(config_dir, &channel);
        let files_dir = entry.path().join("files");
        let backed_up_yml = files_dir.join(format!("{channel}.yml"));
        let backed_up_caddy = files_dir.join(format!("{channel}.caddy"));

        if !yml_path.exists() && backed_up_yml.exists() {
            fs::create_dir_all(config_dir.join("channels"))?;
            fs::copy(&backed_up_yml, &yml_path)?;
            if backed_up_caddy.exists() {
                fs::copy(&backed_up_caddy, &caddy_path)?;
            }
            restored.push(channel);
        }
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::AccessScope;

    fn sample_spec() -> StackSpec {
        StackSpec {
            access_scope: AccessScope::Host,
            ..StackSpec::default()
        }
    }

    #[test]
    fn scenario_g_install_then_uninstall_cycle() {
        let config_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let mut spec = sample_spec();

        let req = InstallRequest {
            channel: "chat".to_string(),
            yml_template: b"name: chat\n".to_vec(),
            caddy_template: b"route /chat/*\n".to_vec(),
        };
        install(config_dir.path(), state_dir.path(), &mut spec, &req, |_| Ok(()), &NullRuntime).unwrap();

        assert!(config_dir.path().join("channels/chat.yml").exists());
        assert!(config_dir.path().join("channels/chat.caddy").exists());
        assert!(spec.channels.contains_key("chat"));
        assert!(spec.channels["chat"].env.contains_key("SECRET"));

        uninstall(config_dir.path(), state_dir.path(), &mut spec, "chat", |_| Ok(()), &NullRuntime).unwrap();

        assert!(!config_dir.path().join("channels/chat.yml").exists());
        assert!(!spec.channels.contains_key("chat"));
    }

    #[test]
    fn install_rollback_on_restage_failure() {
        let config_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let mut spec = sample_spec();
        let req = InstallRequest {
            channel: "chat".to_string(),
            yml_template: b"name: chat\n".to_vec(),
            caddy_template: b"route\n".to_vec(),
        };

        let result = install(
            config_dir.path(),
            state_dir.path(),
            &mut spec,
            &req,
            |_| Err(Error::ConfigConflict("boom".to_string())),
            &NullRuntime,
        );

        assert!(result.is_err());
        assert!(!config_dir.path().join("channels/chat.yml").exists());
        assert!(!spec.channels.contains_key("chat"));
    }

    #[test]
    fn scenario_10_uninstall_rollback_restores_exact_bytes() {
        let config_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let mut spec = sample_spec();
        let req = InstallRequest {
            channel: "chat".to_string(),
            yml_template: b"original-yml-bytes".to_vec(),
            caddy_template: b"original-caddy-bytes".to_vec(),
        };
        install(config_dir.path(), state_dir.path(), &mut spec, &req, |_| Ok(()), &NullRuntime).unwrap();

        let result = uninstall(
            config_dir.path(),
            state_dir.path(),
            &mut spec,
            "chat",
            |_| Err(Error::ConfigConflict("boom".to_string())),
            &NullRuntime,
        );

        assert!(result.is_err());
        let restored_yml = fs::read(config_dir.path().join("channels/chat.yml")).unwrap();
        assert_eq!(restored_yml, b"original-yml-bytes");
        assert!(spec.channels.contains_key("chat"));
        assert!(backup_dir(state_dir.path(), "chat").exists());
    }

    #[test]
    fn startup_recovery_restores_stale_uninstall_backup() {
        let config_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let mut spec = sample_spec();
        let req = InstallRequest {
            channel: "chat".to_string(),
            yml_template: b"bytes".to_vec(),
            caddy_template: b"bytes".to_vec(),
        };
        install(config_dir.path(), state_dir.path(), &mut spec, &req, |_| Ok(()), &NullRuntime).unwrap();

        // Simulate: uninstall recorded intent + backup, but process crashed
        // before restage/clear-backup ran, leaving the live file deleted.
        write_intent(state_dir.path(), "chat", BackupAction::Uninstall).unwrap();
        let backup_files_dir = backup_dir(state_dir.path(), "chat").join("files");
        fs::create_dir_all(&backup_files_dir).unwrap();
        fs::copy(
            config_dir.path().join("channels/chat.yml"),
            backup_files_dir.join("chat.yml"),
        )
        .unwrap();
        fs::remove_file(config_dir.path().join("channels/chat.yml")).unwrap();

        let restored = cleanup_stale_config_backups(state_dir.path(), config_dir.path()).unwrap();
        assert_eq!(restored, vec!["chat".to_string()]);
        assert!(config_dir.path().join("channels/chat.yml").exists());
    }
}
