//! Snapshot / atomic swap (spec §4.5). Live artifact state is never
//! observed half-swapped: a crash between any two steps leaves either the
//! old state intact or the new state intact, never a hybrid.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::render::RenderedArtifacts;

/// Retained snapshot count (spec §4.5 step 6, §5 resource bounds).
pub const SNAPSHOT_RETENTION: usize = 3;

/// Dry-run validation hook for the rendered compose file. Real deployments
/// shell out to the container runtime's `config` subcommand; tests use a
/// stub that always accepts or always rejects.
pub trait ComposeValidator {
    fn validate(&self, compose_path: &Path) -> Result<()>;
}

/// Always accepts — used where no container runtime is available (tests,
/// `doctor` dry-runs without Docker installed).
pub struct NullValidator;

impl ComposeValidator for NullValidator {
    fn validate(&self, _compose_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Shells out to `docker compose -f <path> config` to validate the
/// rendered compose file without starting anything.
pub struct DockerComposeValidator;

impl ComposeValidator for DockerComposeValidator {
    fn validate(&self, compose_path: &Path) -> Result<()> {
        let output = std::process::Command::new("docker")
            .args(["compose", "-f"])
            .arg(compose_path)
            .arg("config")
            .output()
            .map_err(|e| Error::Other(format!("failed to invoke docker compose: {e}")))?;
        if !output.status.success() {
            return Err(Error::ConfigConflict(format!(
                "compose validation failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

pub struct ApplyOutcome {
    /// `None` when this was the first-ever apply (no prior manifest).
    pub snapshot: Option<PathBuf>,
}

fn artifacts_dir(base: &Path) -> PathBuf {
    base.join("artifacts")
}
fn artifacts_pending(base: &Path) -> PathBuf {
    base.join("artifacts.pending")
}
fn artifacts_old(base: &Path) -> PathBuf {
    base.join("artifacts.old")
}
fn channels_dir(base: &Path) -> PathBuf {
    base.join("channels")
}
fn channels_pending(base: &Path) -> PathBuf {
    base.join("channels.pending")
}
fn channels_old(base: &Path) -> PathBuf {
    base.join("channels.old")
}
fn caddyfile(base: &Path) -> PathBuf {
    base.join("Caddyfile")
}
fn caddyfile_pending(base: &Path) -> PathBuf {
    base.join("Caddyfile.pending")
}
fn caddyfile_old(base: &Path) -> PathBuf {
    base.join("Caddyfile.old")
}
fn snapshots_dir(base: &Path) -> PathBuf {
    base.join("snapshots")
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            fs::copy(entry.path(), dst_path)?;
        }
    }
    Ok(())
}

/// Remove any `*.pending` or `*.old` directories/files left by a previous
/// crash. Call before serving (spec §4.5 "Recovery").
pub fn cleanup_stale_pending(base: &Path) -> Result<()> {
    for path in [artifacts_pending(base), artifacts_old(base), channels_pending(base), channels_old(base)] {
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
    }
    for path in [caddyfile_pending(base), caddyfile_old(base)] {
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Copy current live `artifacts/`, `channels/`, `Caddyfile` into
/// `snapshots/<ISO-timestamp>/`. Returns `None` if no prior manifest
/// exists (first-ever apply).
pub fn snapshot_current_state(base: &Path) -> Result<Option<PathBuf>> {
    let manifest_path = artifacts_dir(base).join("manifest.json");
    if !manifest_path.exists() {
        return Ok(None);
    }

    let ts = Utc::now().to_rfc3339();
    let snapshot_dir = snapshots_dir(base).join(&ts);
    fs::create_dir_all(&snapshot_dir)?;

    if artifacts_dir(base).exists() {
        copy_dir_recursive(&artifacts_dir(base), &snapshot_dir.join("artifacts"))?;
    }
    if channels_dir(base).exists() {
        copy_dir_recursive(&channels_dir(base), &snapshot_dir.join("channels"))?;
    }
    if caddyfile(base).exists() {
        fs::copy(caddyfile(base), snapshot_dir.join("Caddyfile"))?;
    }

    Ok(Some(snapshot_dir))
}

/// Retain only the most recent `keep` snapshots by directory-name (ISO
/// timestamp) ordering.
pub fn prune_snapshots(base: &Path, keep: usize) -> Result<()> {
    let dir = snapshots_dir(base);
    if !dir.exists() {
        return Ok(());
    }
    let mut names: Vec<String> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    if names.len() > keep {
        for stale in &names[..names.len() - keep] {
            fs::remove_dir_all(dir.join(stale))?;
        }
    }
    Ok(())
}

/// Restore live state from a snapshot directory (used by both startup
/// recovery paths and the admin-triggered rollback path).
pub fn restore_snapshot(base: &Path, snapshot: &Path) -> Result<()> {
    let src_artifacts = snapshot.join("artifacts");
    let src_channels = snapshot.join("channels");
    let src_caddyfile = snapshot.join("Caddyfile");

    if src_artifacts.exists() {
        if artifacts_dir(base).exists() {
            fs::remove_dir_all(artifacts_dir(base))?;
        }
        copy_dir_recursive(&src_artifacts, &artifacts_dir(base))?;
    }
    if src_channels.exists() {
        if channels_dir(base).exists() {
            fs::remove_dir_all(channels_dir(base))?;
        }
        copy_dir_recursive(&src_channels, &channels_dir(base))?;
    }
    if src_caddyfile.exists() {
        fs::copy(src_caddyfile, caddyfile(base))?;
    }
    Ok(())
}

fn write_artifacts_pending(base: &Path, artifacts: &RenderedArtifacts) -> Result<()> {
    let pending = artifacts_pending(base);
    if pending.exists() {
        fs::remove_dir_all(&pending)?;
    }
    fs::create_dir_all(&pending)?;

    fs::write(pending.join("docker-compose.yml"), &artifacts.compose_yaml)?;
    for (name, contents) in &artifacts.env_files {
        fs::write(pending.join(name), contents)?;
    }
    let manifest_json = serde_json::to_string_pretty(&artifacts.manifest)?;
    fs::write(pending.join("manifest.json"), manifest_json)?;

    fs::write(caddyfile_pending(base), &artifacts.caddy_json)?;
    fs::create_dir_all(channels_pending(base))?;
    Ok(())
}

/// Full apply algorithm (spec §4.5 steps 1-6).
pub fn apply<V: ComposeValidator>(base: &Path, artifacts: &RenderedArtifacts, validator: &V) -> Result<ApplyOutcome> {
    fs::create_dir_all(base)?;
    write_artifacts_pending(base, artifacts)?;

    let validation_result = validator.validate(&artifacts_pending(base).join("docker-compose.yml"));
    if let Err(e) = validation_result {
        // Abort, leaving live state untouched; drop the pending staging.
        let _ = fs::remove_dir_all(artifacts_pending(base));
        let _ = fs::remove_file(caddyfile_pending(base));
        let _ = fs::remove_dir_all(channels_pending(base));
        return Err(e);
    }

    let snapshot = snapshot_current_state(base)?;

    if artifacts_dir(base).exists() {
        fs::rename(artifacts_dir(base), artifacts_old(base))?;
    }
    fs::rename(artifacts_pending(base), artifacts_dir(base))?;

    if channels_dir(base).exists() {
        fs::rename(channels_dir(base), channels_old(base))?;
    }
    fs::rename(channels_pending(base), channels_dir(base))?;

    if caddyfile(base).exists() {
        fs::rename(caddyfile(base), caddyfile_old(base))?;
    }
    fs::rename(caddyfile_pending(base), caddyfile(base))?;

    // .old removal failures leave only garbage, never broken live state.
    let _ = fs::remove_dir_all(artifacts_old(base));
    let _ = fs::remove_dir_all(channels_old(base));
    let _ = fs::remove_file(caddyfile_old(base));

    prune_snapshots(base, SNAPSHOT_RETENTION)?;

    Ok(ApplyOutcome { snapshot })
}
