//! Admin REST surface (spec §4.9, §6). Every mutation requires
//! [`AdminGuard`], captures a fresh request id and actor, and appends an
//! audit record whether it succeeds or fails.

use std::collections::BTreeMap;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use op_audit::AuditRecord;

use crate::admin::guard::{actor_info, AdminGuard};
use crate::admin::state::{hash_token, AppState};
use crate::channels::{self, DockerComposeRuntime, InstallRequest};
use crate::error::{Error, Result};
use crate::render;
use crate::scheduler::{self, model::AutomationConfig};
use crate::snapshot::{self, DockerComposeValidator};
use crate::spec::StackSpec;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/setup", post(setup))
        .route("/automations/:id", get(get_automation).patch(patch_automation).delete(delete_automation))
        .route("/automations/:id/run", post(run_automation))
        .route("/channels/install", post(channels_install))
        .route("/channels/uninstall", post(channels_uninstall))
        .route("/install", post(stack_install))
        .route("/update", post(stack_update))
        .route("/uninstall", post(stack_uninstall))
        .route("/artifacts", get(list_artifacts))
        .route("/artifacts/manifest", get(get_manifest))
        .route("/artifacts/:name", get(get_artifact))
        .route("/containers/list", get(containers_list))
        .route("/containers/up", post(containers_up))
        .route("/containers/down", post(containers_down))
        .route("/containers/restart", post(containers_restart))
        .route("/connections", post(set_connections))
        .route("/audit", get(get_audit))
        .with_state(state)
}

fn request_context(headers: &HeaderMap) -> (String, String, String) {
    let request_id = Uuid::new_v4().to_string();
    let (actor, caller_type) = actor_info(headers);
    (request_id, actor, caller_type)
}

fn ok_envelope(request_id: &str, body: Value) -> Response {
    let mut value = body;
    if let Value::Object(map) = &mut value {
        map.insert("requestId".to_string(), Value::String(request_id.to_string()));
    }
    let mut response = Json(value).into_response();
    response.headers_mut().insert("x-request-id", request_id.parse().unwrap());
    response
}

fn err_envelope(status: StatusCode, request_id: &str, message: impl Into<String>) -> Response {
    let mut response = (
        status,
        Json(serde_json::json!({ "error": message.into(), "requestId": request_id })),
    )
        .into_response();
    response.headers_mut().insert("x-request-id", request_id.parse().unwrap());
    response
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::ConfigConflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn compose_file_path(state: &AppState) -> std::path::PathBuf {
    state.state_dir.join("artifacts").join("docker-compose.yml")
}

fn restage(state: &AppState) -> impl FnOnce(&StackSpec) -> Result<()> + '_ {
    move |spec: &StackSpec| {
        let artifacts = render::render(spec)?;
        let validator = DockerComposeValidator;
        snapshot::apply(&state.state_dir, &artifacts, &validator).map(|_| ())
    }
}

// ---- /setup -----------------------------------------------------------

#[derive(Deserialize)]
struct SetupRequest {
    #[serde(rename = "adminToken")]
    admin_token: String,
}

/// Open until the admin token is first set; thereafter requires the
/// existing token to match (spec §4.9 "First-boot exception").
async fn setup(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<SetupRequest>) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);

    {
        let current = state.admin_token_hash.lock();
        if let Some(expected) = current.as_ref() {
            let provided = headers.get("x-admin-token").and_then(|v| v.to_str().ok()).unwrap_or("");
            let provided_hash = Sha256::digest(provided.as_bytes());
            if !bool::from(provided_hash.ct_eq(expected)) {
                state.audit.append(
                    &AuditRecord::new(actor, "admin.setup", "denied")
                        .with_request_id(request_id.clone())
                        .with("callerType", caller_type),
                );
                return err_envelope(StatusCode::UNAUTHORIZED, &request_id, "admin token already configured");
            }
        }
    }

    if req.admin_token.is_empty() {
        return err_envelope(StatusCode::BAD_REQUEST, &request_id, "adminToken must not be empty");
    }

    let secrets_path = state.config_dir.join("secrets.env");
    let mut updates = BTreeMap::new();
    updates.insert("ADMIN_TOKEN".to_string(), req.admin_token.clone());
    if let Err(e) = crate::secrets::merge_into_file(&secrets_path, &updates, false) {
        return err_envelope(status_for(&e), &request_id, e.to_string());
    }

    *state.admin_token_hash.lock() = Some(hash_token(&req.admin_token));

    state.audit.append(
        &AuditRecord::new(actor, "admin.setup", "ok")
            .with_request_id(request_id.clone())
            .with("callerType", caller_type),
    );

    ok_envelope(&request_id, serde_json::json!({ "ok": true }))
}

// ---- automations --------------------------------------------------------

fn automation_path(state: &AppState, id: &str) -> std::path::PathBuf {
    state.state_dir.join("automations").join(format!("{id}.yml"))
}

fn load_automation(state: &AppState, id: &str) -> Result<AutomationConfig> {
    let path = automation_path(state, id);
    if !path.exists() {
        return Err(Error::NotFound(format!("automation {id} not found")));
    }
    let raw = std::fs::read_to_string(&path)?;
    let mut config: AutomationConfig = serde_yaml::from_str(&raw).map_err(|e| Error::Parse(e.to_string()))?;
    config.file_name = format!("{id}.yml");
    Ok(config)
}

async fn get_automation(State(state): State<AppState>, headers: HeaderMap, AxumPath(id): AxumPath<String>, _guard: AdminGuard) -> Response {
    let (request_id, _, _) = request_context(&headers);
    match load_automation(&state, &id) {
        Ok(config) => ok_envelope(&request_id, serde_json::to_value(config).unwrap()),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

async fn patch_automation(
    State(state): State<AppState>,
    headers: HeaderMap,
    AxumPath(id): AxumPath<String>,
    _guard: AdminGuard,
    Json(patch): Json<Value>,
) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let action = "admin.automations.patch";

    let result = (|| -> Result<AutomationConfig> {
        let existing = load_automation(&state, &id)?;
        let mut value = serde_json::to_value(&existing).map_err(Error::Json)?;
        if let (Value::Object(base), Value::Object(patch_fields)) = (&mut value, patch) {
            for (k, v) in patch_fields {
                base.insert(k, v);
            }
        }
        let updated: AutomationConfig = serde_json::from_value(value).map_err(Error::Json)?;
        scheduler::cron::validate(&updated.schedule).map_err(Error::Validation)?;

        let yaml = serde_yaml::to_string(&updated).map_err(|e| Error::Parse(e.to_string()))?;
        std::fs::write(automation_path(&state, &id), yaml)?;
        Ok(updated)
    })();

    match result {
        Ok(updated) => {
            state.scheduler.lock().reload();
            state.audit.append(
                &AuditRecord::new(actor, action, "ok")
                    .with_request_id(request_id.clone())
                    .with("callerType", caller_type)
                    .with("automation", &id),
            );
            ok_envelope(&request_id, serde_json::to_value(updated).unwrap())
        }
        Err(e) => {
            state.audit.append(
                &AuditRecord::new(actor, action, "error")
                    .with_request_id(request_id.clone())
                    .with("callerType", caller_type)
                    .with("automation", &id)
                    .with("reason", e.to_string()),
            );
            err_envelope(status_for(&e), &request_id, e.to_string())
        }
    }
}

async fn delete_automation(State(state): State<AppState>, headers: HeaderMap, AxumPath(id): AxumPath<String>, _guard: AdminGuard) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let path = automation_path(&state, &id);
    let result = if path.exists() {
        std::fs::remove_file(&path).map_err(Error::Io)
    } else {
        Err(Error::NotFound(format!("automation {id} not found")))
    };

    match result {
        Ok(()) => {
            state.scheduler.lock().reload();
            state.audit.append(
                &AuditRecord::new(actor, "admin.automations.delete", "ok")
                    .with_request_id(request_id.clone())
                    .with("callerType", caller_type)
                    .with("automation", &id),
            );
            ok_envelope(&request_id, serde_json::json!({ "ok": true }))
        }
        Err(e) => {
            state.audit.append(
                &AuditRecord::new(actor, "admin.automations.delete", "error")
                    .with_request_id(request_id.clone())
                    .with("callerType", caller_type)
                    .with("automation", &id)
                    .with("reason", e.to_string()),
            );
            err_envelope(status_for(&e), &request_id, e.to_string())
        }
    }
}

async fn run_automation(State(state): State<AppState>, headers: HeaderMap, AxumPath(id): AxumPath<String>, _guard: AdminGuard) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);

    let config = match load_automation(&state, &id) {
        Ok(c) => c,
        Err(e) => return err_envelope(status_for(&e), &request_id, e.to_string()),
    };

    let http = state.scheduler.lock().http();
    let admin_port = state.scheduler.lock().admin_port();
    let admin_token = state.scheduler.lock().admin_token().to_string();
    let entry = scheduler::execute(&http, admin_port, &admin_token, &config.action).await;
    state.scheduler.lock().record_execution(&id, entry.clone());

    let status = if entry.ok { "ok" } else { "error" };
    let mut record = AuditRecord::new(actor, "admin.automations.run", status)
        .with_request_id(request_id.clone())
        .with("callerType", caller_type)
        .with("automation", &id);
    if let Some(err) = &entry.error {
        record = record.with("reason", err);
    }
    state.audit.append(&record);

    ok_envelope(&request_id, serde_json::to_value(&entry).unwrap())
}

// ---- channel install/uninstall ------------------------------------------

#[derive(Deserialize)]
struct ChannelInstallBody {
    channel: String,
    #[serde(rename = "ymlTemplate")]
    yml_template: String,
    #[serde(rename = "caddyTemplate")]
    caddy_template: String,
}

async fn channels_install(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard, Json(body): Json<ChannelInstallBody>) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let channel = body.channel.clone();

    let result = (|| -> Result<()> {
        let mut spec = state.spec.lock();
        let req = InstallRequest {
            channel: body.channel,
            yml_template: body.yml_template.into_bytes(),
            caddy_template: body.caddy_template.into_bytes(),
        };
        let runtime = DockerComposeRuntime { compose_file: compose_file_path(&state) };
        channels::install(&state.config_dir, &state.state_dir, &mut *spec, &req, restage(&state), &runtime)?;
        spec.save(&state.config_dir.join("openpalm.yaml"))?;
        Ok(())
    })();

    audit_mutation(&state, &request_id, &actor, &caller_type, "admin.channels.install", Some(&channel), &result);
    match result {
        Ok(()) => ok_envelope(&request_id, serde_json::json!({ "ok": true, "channel": channel })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

#[derive(Deserialize)]
struct ChannelUninstallBody {
    channel: String,
}

async fn channels_uninstall(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard, Json(body): Json<ChannelUninstallBody>) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let channel = body.channel.clone();

    let result = (|| -> Result<()> {
        let mut spec = state.spec.lock();
        let runtime = DockerComposeRuntime { compose_file: compose_file_path(&state) };
        channels::uninstall(&state.config_dir, &state.state_dir, &mut *spec, &channel, restage(&state), &runtime)?;
        spec.save(&state.config_dir.join("openpalm.yaml"))?;
        Ok(())
    })();

    audit_mutation(&state, &request_id, &actor, &caller_type, "admin.channels.uninstall", Some(&channel), &result);
    match result {
        Ok(()) => ok_envelope(&request_id, serde_json::json!({ "ok": true, "channel": channel })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

// ---- stack lifecycle ------------------------------------------------------

async fn stack_install(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    apply_stack(state, headers, "admin.install", &["up", "-d"]).await
}

async fn stack_update(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    apply_stack(state, headers, "admin.update", &["up", "-d"]).await
}

async fn stack_uninstall(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let compose_file = compose_file_path(&state);
    let result = run_docker_compose(&compose_file, &["down"]);
    audit_mutation(&state, &request_id, &actor, &caller_type, "admin.uninstall", None, &result);
    match result {
        Ok(stdout) => ok_envelope(&request_id, serde_json::json!({ "ok": true, "output": stdout })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

async fn apply_stack(state: AppState, headers: HeaderMap, action: &str, compose_args: &[&str]) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);

    let result = (|| -> Result<()> {
        let spec = state.spec.lock().clone();
        let artifacts = render::render(&spec)?;
        let validator = DockerComposeValidator;
        snapshot::apply(&state.state_dir, &artifacts, &validator)?;
        run_docker_compose(&compose_file_path(&state), compose_args)?;
        Ok(())
    })();

    audit_mutation(&state, &request_id, &actor, &caller_type, action, None, &result);
    match result {
        Ok(()) => ok_envelope(&request_id, serde_json::json!({ "ok": true })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

fn audit_mutation(state: &AppState, request_id: &str, actor: &str, caller_type: &str, action: &str, channel: Option<&str>, result: &Result<()>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    let mut record = AuditRecord::new(actor, action, status)
        .with_request_id(request_id.to_string())
        .with("callerType", caller_type);
    if let Some(c) = channel {
        record = record.with("channel", c);
    }
    if let Err(e) = result {
        record = record.with("reason", e.to_string());
    }
    state.audit.append(&record);
}

// ---- artifacts ------------------------------------------------------------

async fn list_artifacts(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let dir = state.state_dir.join("artifacts");
    let names: Vec<String> = std::fs::read_dir(&dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().to_string()).collect())
        .unwrap_or_default();
    Json(serde_json::json!({ "artifacts": names })).into_response()
}

async fn get_manifest(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    let path = state.state_dir.join("artifacts").join("manifest.json");
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(v) => Json(v).into_response(),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "corrupt manifest").into_response(),
        },
        Err(_) => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not_found" }))).into_response(),
    }
}

async fn get_artifact(State(state): State<AppState>, AxumPath(name): AxumPath<String>, _guard: AdminGuard) -> Response {
    if name.contains("..") || name.contains('/') {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "invalid_name" }))).into_response();
    }
    let path = state.state_dir.join("artifacts").join(&name);
    match std::fs::read_to_string(&path) {
        Ok(contents) => contents.into_response(),
        Err(_) => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not_found" }))).into_response(),
    }
}

// ---- containers ------------------------------------------------------------

fn run_docker_compose(compose_file: &std::path::Path, args: &[&str]) -> Result<String> {
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
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn containers_list(State(state): State<AppState>, _guard: AdminGuard) -> Response {
    match run_docker_compose(&compose_file_path(&state), &["ps", "--format", "json"]) {
        Ok(stdout) => Json(serde_json::json!({ "containers": stdout })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    }
}

async fn containers_up(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    container_action(state, headers, "admin.containers.up", &["up", "-d"]).await
}

async fn containers_down(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    container_action(state, headers, "admin.containers.down", &["down"]).await
}

async fn containers_restart(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard) -> Response {
    container_action(state, headers, "admin.containers.restart", &["restart"]).await
}

async fn container_action(state: AppState, headers: HeaderMap, action: &str, args: &[&str]) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);
    let result = run_docker_compose(&compose_file_path(&state), args).map(|_| ());
    audit_mutation(&state, &request_id, &actor, &caller_type, action, None, &result);
    match result {
        Ok(()) => ok_envelope(&request_id, serde_json::json!({ "ok": true })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

// ---- connections ------------------------------------------------------------

/// Allow-listed keys a `/connections` request may set (spec §4.9
/// "POST /connections (allow-listed keys only)", spec §6 "Environment").
const ALLOWED_CONNECTION_KEYS: &[&str] = &["GUARDIAN_URL", "OPENMEMORY_URL", "OPENMEMORY_API_KEY", "POSTGRES_PASSWORD"];

async fn set_connections(State(state): State<AppState>, headers: HeaderMap, _guard: AdminGuard, Json(updates): Json<BTreeMap<String, String>>) -> Response {
    let (request_id, actor, caller_type) = request_context(&headers);

    let result: Result<()> = (|| {
        for key in updates.keys() {
            if !ALLOWED_CONNECTION_KEYS.contains(&key.as_str()) {
                return Err(Error::Validation(format!("key not allow-listed: {key}")));
            }
        }
        let secrets_path = state.config_dir.join("secrets.env");
        crate::secrets::merge_into_file(&secrets_path, &updates, false)
    })();

    audit_mutation(&state, &request_id, &actor, &caller_type, "admin.connections.set", None, &result);
    match result {
        Ok(()) => ok_envelope(&request_id, serde_json::json!({ "ok": true })),
        Err(e) => err_envelope(status_for(&e), &request_id, e.to_string()),
    }
}

// ---- audit ------------------------------------------------------------

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn get_audit(State(state): State<AppState>, Query(query): Query<AuditQuery>, _guard: AdminGuard) -> Response {
    let limit = query.limit.unwrap_or(100).min(1000);
    let raw = std::fs::read_to_string(state.audit.path()).unwrap_or_default();
    let lines: Vec<Value> = raw
        .lines()
        .rev()
        .take(limit)
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect::<Vec<Value>>()
        .into_iter()
        .rev()
        .collect();
    Json(serde_json::json!({ "entries": lines })).into_response()
}
