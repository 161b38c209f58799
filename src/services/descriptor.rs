//! Platform deployment descriptor rendering.
//!
//! The descriptor is plain text the platform stores next to the release, so
//! only non-secret configuration may end up in it. Secret values travel in
//! [`DeployConfig::secrets`](crate::connectors::DeployConfig) instead.

use crate::helpers::SecretCipher;
use crate::models::EnvVar;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tera::{Context as TeraContext, Tera};

#[derive(Debug, Clone, Serialize)]
pub struct DescriptorContext {
    pub app_name: String,
    pub region: String,
    pub cpus: u32,
    pub memory_mb: u32,
    pub internal_port: u16,
    pub dockerfile: String,
    pub env: BTreeMap<String, String>,
    pub pr_number: i32,
    pub commit_sha: String,
}

pub struct DescriptorRenderer {
    tera: Tera,
}

impl DescriptorRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("descriptor.toml.tera", DESCRIPTOR_TEMPLATE)
            .context("Failed to add descriptor template")?;
        Ok(Self { tera })
    }

    pub fn render(&self, descriptor: &DescriptorContext) -> Result<String> {
        let context =
            TeraContext::from_serialize(descriptor).context("Failed to build descriptor context")?;
        self.tera
            .render("descriptor.toml.tera", &context)
            .context("Failed to render descriptor template")
    }
}

/// Environment split into plain values and decrypted secrets.
#[derive(Default)]
pub struct ResolvedEnv {
    pub plain: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
}

impl ResolvedEnv {
    pub fn secret_values(&self) -> Vec<String> {
        self.secrets.values().cloned().collect()
    }
}

/// Merge the project's build-config env with its stored variables (stored
/// ones win) and decrypt the secret ones.
pub fn resolve_env(
    build_env: &HashMap<String, String>,
    vars: &[EnvVar],
    cipher: &SecretCipher,
) -> Result<ResolvedEnv, String> {
    let mut resolved = ResolvedEnv {
        plain: build_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        secrets: BTreeMap::new(),
    };

    for var in vars {
        if var.is_secret {
            let value = cipher
                .decrypt(&var.value)
                .map_err(|err| format!("cannot decrypt env var {}: {}", var.key, err))?;
            resolved.plain.remove(&var.key);
            resolved.secrets.insert(var.key.clone(), value);
        } else {
            resolved.secrets.remove(&var.key);
            resolved.plain.insert(var.key.clone(), var.value.clone());
        }
    }
    Ok(resolved)
}

const DESCRIPTOR_TEMPLATE: &str = r#"# preview deployment for PR #{{ pr_number }} at {{ commit_sha }}
app = {{ app_name | json_encode() | safe }}
primary_region = {{ region | json_encode() | safe }}

[build]
  dockerfile = {{ dockerfile | json_encode() | safe }}

[http_service]
  internal_port = {{ internal_port }}
  force_https = true
  auto_stop_machines = true
  auto_start_machines = true
  min_machines_running = 0

[[vm]]
  cpus = {{ cpus }}
  memory_mb = {{ memory_mb }}
{% if env | length > 0 %}
[env]
{% for key, value in env %}  {{ key | json_encode() | safe }} = {{ value | json_encode() | safe }}
{% endfor %}{% endif %}"#;
