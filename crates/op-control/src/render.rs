//! Artifact renderer (spec §4.4): turns a [`StackSpec`] into the compose
//! file, reverse-proxy config, per-service env files and an integrity
//! manifest. Secret values are embedded by reference (compose env
//! interpolation), never as literals.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::spec::StackSpec;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub sha256: String,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct RenderedArtifacts {
    pub compose_yaml: String,
    pub caddy_json: String,
    /// Per-service env file contents, keyed by file name (`<service>.env`).
    pub env_files: BTreeMap<String, String>,
    pub manifest: Manifest,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

fn manifest_entry(name: &str, contents: &str, generated_at: &str) -> ManifestEntry {
    ManifestEntry {
        name: name.to_string(),
        sha256: sha256_hex(contents.as_bytes()),
        generated_at: generated_at.to_string(),
        bytes: contents.len(),
    }
}

fn validate_ingress_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(Error::Validation("invalid_ingress_port".to_string()));
    }
    Ok(())
}

/// Render every artifact for `spec`. Deterministic: identical spec produces
/// byte-identical output (no timestamps or randomness in the artifact
/// bodies themselves — only the manifest's `generatedAt` varies).
pub fn render(spec: &StackSpec) -> Result<RenderedArtifacts> {
    validate_ingress_port(spec.ingress_port)?;

    let bind_address = spec.access_scope.bind_address();
    let generated_at = Utc::now().to_rfc3339();

    let compose_yaml = render_compose(spec, bind_address)?;
    let caddy_json = render_caddy(spec)?;
    let env_files = render_env_files(spec, bind_address);

    let mut manifest = Manifest::default();
    manifest
        .entries
        .push(manifest_entry("docker-compose.yml", &compose_yaml, &generated_at));
    manifest
        .entries
        .push(manifest_entry("caddy.json", &caddy_json, &generated_at));
    for (name, contents) in &env_files {
        manifest.entries.push(manifest_entry(name, contents, &generated_at));
    }

    Ok(RenderedArtifacts {
        compose_yaml,
        caddy_json,
        env_files,
        manifest,
    })
}

#[derive(Serialize)]
struct ComposeFile {
    version: &'static str,
    services: BTreeMap<String, ComposeService>,
}

#[derive(Serialize)]
struct ComposeService {
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    env_file: String,
}

fn render_compose(spec: &StackSpec, _bind_address: &str) -> Result<String> {
    let mut services = BTreeMap::new();

    for core in &spec.core_services {
        services.insert(
            core.clone(),
            ComposeService {
                image: format!("openpalm/{core}:latest"),
                depends_on: Vec::new(),
                env_file: format!("{core}.env"),
            },
        );
    }

    for (name, instance) in &spec.channels {
        let service_name = StackSpec::channel_service_name(name);
        let depends_on: Vec<String> = spec
            .core_services
            .iter()
            .filter(|c| c.as_str() == "guardian")
            .cloned()
            .collect();
        let _ = instance;
        services.insert(
            service_name.clone(),
            ComposeService {
                image: format!("openpalm/channel-{name}:latest"),
                depends_on,
                env_file: format!("{service_name}.env"),
            },
        );
    }

    let compose = ComposeFile {
        version: "3.9",
        services,
    };

    serde_yaml::to_string(&compose).map_err(|e| Error::Parse(e.to_string()))
}

#[derive(Serialize)]
struct CaddyConfig {
    listen: Vec<String>,
    routes: Vec<CaddyRoute>,
}

#[derive(Serialize)]
struct CaddyRoute {
    #[serde(rename = "match")]
    matches: Vec<CaddyMatch>,
    upstream: String,
}

#[derive(Serialize)]
struct CaddyMatch {
    path: Vec<String>,
}

fn render_caddy(spec: &StackSpec) -> Result<String> {
    let mut routes = vec![
        CaddyRoute {
            matches: vec![CaddyMatch { path: vec!["/v1/*".to_string()] }],
            upstream: "channel-api".to_string(),
        },
        CaddyRoute {
            matches: vec![CaddyMatch { path: vec!["/a2a/*".to_string()] }],
            upstream: "channel-a2a".to_string(),
        },
        CaddyRoute {
            matches: vec![CaddyMatch { path: vec!["/chat/*".to_string()] }],
            upstream: "channel-chat".to_string(),
        },
        CaddyRoute {
            matches: vec![CaddyMatch { path: vec!["/admin/*".to_string()] }],
            upstream: "admin".to_string(),
        },
        CaddyRoute {
            matches: vec![CaddyMatch { path: vec!["/health".to_string()] }],
            upstream: "guardian".to_string(),
        },
    ];

    for name in spec.channels.keys() {
        let service_name = StackSpec::channel_service_name(name);
        routes.push(CaddyRoute {
            matches: vec![CaddyMatch { path: vec![format!("/{name}/*")] }],
            upstream: service_name,
        });
    }

    let config = CaddyConfig {
        listen: vec![format!(":{}", spec.ingress_port)],
        routes,
    };

    serde_json::to_string_pretty(&config).map_err(Error::Json)
}

fn render_env_files(spec: &StackSpec, bind_address: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();

    for core in &spec.core_services {
        let mut contents = format!("BIND_ADDRESS={bind_address}\n");
        if core == "proxy" {
            contents.push_str(&format!("INGRESS_PORT={}\n", spec.ingress_port));
        }
        files.insert(format!("{core}.env"), contents);
    }

    for (name, instance) in &spec.channels {
        let service_name = StackSpec::channel_service_name(name);
        let mut contents = format!("BIND_ADDRESS={bind_address}\n");
        for (key, value) in &instance.env {
            if key == "SECRET" {
                // Secret values are referenced, never embedded as literals.
                contents.push_str(&format!("CHANNEL_{}_SECRET=${{CHANNEL_{}_SECRET}}\n", name.to_uppercase(), name.to_uppercase()));
                continue;
            }
            contents.push_str(&format!("{key}={value}\n"));
        }
        files.insert(format!("{service_name}.env"), contents);
    }

    files
}
