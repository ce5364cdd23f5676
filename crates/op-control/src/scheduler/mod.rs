//! Automation scheduler (spec §4.7): loads cron-scheduled automations,
//! fires them in-process with overrun protection, and keeps a bounded
//! execution log per automation.

pub mod cron;
pub mod model;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::process::Command;

pub use model::{ActionKind, AutomationConfig, ExecutionLogEntry, ExecutionLogRing, OnFailure};

/// One loaded automation plus its live scheduling state.
struct JobHandle {
    config: AutomationConfig,
    tz: chrono_tz::Tz,
    next_run: Mutex<chrono::DateTime<Utc>>,
    /// Overrun protection: a second fire while the previous run is still
    /// executing is dropped (spec §4.7 step 3).
    running: Arc<AtomicBool>,
    log: Mutex<ExecutionLogRing>,
}

pub struct Scheduler {
    state_dir: PathBuf,
    admin_port: u16,
    admin_token: String,
    http: reqwest::Client,
    jobs: Arc<Mutex<Vec<Arc<JobHandle>>>>,
    tick_handle: Option<tokio::task::JoinHandle<()>>,
}

/// Read every `*.yml` file under `<state>/automations/`, parsing each to
/// an [`AutomationConfig`]. Parse failures are logged and skipped (spec
/// §4.7 step 1).
pub fn load_configs(state_dir: &Path) -> Vec<AutomationConfig> {
    let dir = state_dir.join("automations");
    let Ok(read_dir) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut configs = Vec::new();
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yml") {
            continue;
        }
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str::<AutomationConfig>(&raw) {
                Ok(mut config) => {
                    config.file_name = file_name;
                    configs.push(config);
                }
                Err(e) => {
                    tracing::warn!(file = %file_name, error = %e, "skipping unparseable automation");
                }
            },
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "failed to read automation file");
            }
        }
    }
    configs
}

impl Scheduler {
    pub fn new(state_dir: PathBuf, admin_port: u16, admin_token: String) -> Self {
        Self {
            state_dir,
            admin_port,
            admin_token,
            http: reqwest::Client::new(),
            jobs: Arc::new(Mutex::new(Vec::new())),
            tick_handle: None,
        }
    }

    /// Load automations and start the background tick loop.
    pub fn start(&mut self) {
        let configs = load_configs(&self.state_dir);
        let now = Utc::now();
        let mut jobs = Vec::new();
        for config in configs {
            if !config.enabled {
                continue;
            }
            let schedule = cron::resolve_preset(&config.schedule);
            let tz = cron::parse_tz(&config.timezone);
            let Some(next_run) = cron::next_occurrence(&schedule, &now, tz) else {
                tracing::warn!(automation = %config.name, "could not compute next occurrence; skipping");
                continue;
            };
            jobs.push(Arc::new(JobHandle {
                config,
                tz,
                next_run: Mutex::new(next_run),
                running: Arc::new(AtomicBool::new(false)),
                log: Mutex::new(ExecutionLogRing::default()),
            }));
        }
        *self.jobs.lock() = jobs;

        let jobs_ref = Arc::clone(&self.jobs);
        let http = self.http.clone();
        let admin_port = self.admin_port;
        let admin_token = self.admin_token.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let now = Utc::now();
                let due: Vec<Arc<JobHandle>> = jobs_ref
                    .lock()
                    .iter()
                    .filter(|j| *j.next_run.lock() <= now)
                    .cloned()
                    .collect();
                for job in due {
                    if job.running.swap(true, Ordering::SeqCst) {
                        // Still executing from a previous fire — drop this one,
                        // but still advance next_run so we don't spin on it.
                        let schedule = cron::resolve_preset(&job.config.schedule);
                        if let Some(next) = cron::next_occurrence(&schedule, &now, job.tz) {
                            *job.next_run.lock() = next;
                        }
                        continue;
                    }
                    let job = Arc::clone(&job);
                    let http = http.clone();
                    let admin_token = admin_token.clone();
                    tokio::spawn(async move {
                        let entry = execute(&http, admin_port, &admin_token, &job.config.action).await;
                        job.log.lock().push(entry);
                        let schedule = cron::resolve_preset(&job.config.schedule);
                        let fire_time = Utc::now();
                        if let Some(next) = cron::next_occurrence(&schedule, &fire_time, job.tz) {
                            *job.next_run.lock() = next;
                        }
                        job.running.store(false, Ordering::SeqCst);
                    });
                }
            }
        });
        self.tick_handle = Some(handle);
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.tick_handle.take() {
            handle.abort();
        }
    }

    /// Stop all jobs, clear execution logs, restart from disk (spec §4.7
    /// "Reload semantics" — called after any mutation that changes
    /// automations).
    pub fn reload(&mut self) {
        self.stop();
        self.start();
    }

    pub fn execution_log(&self, automation_name: &str) -> Vec<ExecutionLogEntry> {
        self.jobs
            .lock()
            .iter()
            .find(|j| j.config.name == automation_name)
            .map(|j| j.log.lock().entries().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a manually-triggered run's result to its job's log, if the
    /// automation is currently loaded (enabled).
    pub fn record_execution(&self, automation_name: &str, entry: ExecutionLogEntry) {
        if let Some(job) = self.jobs.lock().iter().find(|j| j.config.name == automation_name) {
            job.log.lock().push(entry);
        }
    }

    pub fn admin_port(&self) -> u16 {
        self.admin_port
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn http(&self) -> reqwest::Client {
        self.http.clone()
    }
}

/// Run one action to completion and record the outcome. Used both by the
/// tick loop and by the admin API's manual "run now" endpoint.
pub async fn execute(http: &reqwest::Client, admin_port: u16, admin_token: &str, action: &ActionKind) -> ExecutionLogEntry {
    let started = Instant::now();
    let at = Utc::now();
    let timeout = Duration::from_secs(action.timeout_secs());

    let result = tokio::time::timeout(timeout, run_action(http, admin_port, admin_token, action)).await;

    let (ok, error) = match result {
        Ok(Ok(())) => (true, None),
        Ok(Err(e)) => (false, Some(e)),
        Err(_) => (false, Some("action timed out".to_string())),
    };

    ExecutionLogEntry {
        at,
        ok,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
    }
}

async fn run_action(
    http: &reqwest::Client,
    admin_port: u16,
    admin_token: &str,
    action: &ActionKind,
) -> Result<(), String> {
    match action {
        ActionKind::Api { path, method, body, .. } => {
            let url = format!("http://localhost:{admin_port}{path}");
            let mut req = http.request(parse_method(method), &url).header("x-admin-token", admin_token);
            if let Some(b) = body {
                req = req.header("content-type", "application/json").json(b);
            }
            let resp = req.send().await.map_err(|e| e.to_string())?;
            if !resp.status().is_success() {
                return Err(format!("non-2xx response: {}", resp.status()));
            }
            Ok(())
        }
        ActionKind::Http { url, method, body, .. } => {
            let mut req = http.request(parse_method(method), url);
            if let Some(b) = body {
                req = req.header("content-type", "application/json").json(b);
            }
            let resp = req.send().await.map_err(|e| e.to_string())?;
            if !resp.status().is_success() {
                return Err(format!("non-2xx response: {}", resp.status()));
            }
            Ok(())
        }
        ActionKind::Shell { command, .. } => {
            let Some((program, args)) = command.split_first() else {
                return Err("shell action command must have at least one element".to_string());
            };
            let status = Command::new(program)
                .args(args)
                .status()
                .await
                .map_err(|e| e.to_string())?;
            if !status.success() {
                return Err(format!("process exited with {status}"));
            }
            Ok(())
        }
    }
}

fn parse_method(method: &str) -> reqwest::Method {
    method.parse().unwrap_or(reqwest::Method::POST)
}
