use serde;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub app_port: u16,
    pub app_host: String,
    pub redis: RedisSettings,
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
    pub platform: PlatformSettings,
    pub source_control: SourceControlSettings,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub sweep: SweepSettings,
    pub security: SecuritySettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

/// Inbound webhook policy. The secret is normally supplied through
/// `PREVIEWER__WEBHOOK__SECRET`; an empty secret makes ingress refuse every
/// delivery with a 500.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_replay_ttl_secs")]
    pub replay_ttl_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_window: u32,
    #[serde(default = "default_rate_window_secs")]
    pub rate_limit_window_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ReconcileSettings {
    pub cooldown_secs: i64,
    pub lock_timeout_ms: u64,
    pub tx_max_attempts: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            lock_timeout_ms: 5000,
            tx_max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub max_job_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            queue_capacity: 256,
            max_job_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlatformSettings {
    pub api_url: String,
    #[serde(default)]
    pub token: String,
    pub organization: String,
    pub default_region: String,
    pub cpus: u32,
    pub memory_mb: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SourceControlSettings {
    pub api_url: String,
    pub clone_base_url: String,
    /// Token used when the delivery carries no installation id.
    #[serde(default)]
    pub token: String,
    /// GitHub App id; with `private_key` enables installation tokens.
    #[serde(default)]
    pub app_id: Option<String>,
    /// PEM encoded RSA key of the GitHub App.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotifierSettings {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            attempts: 2,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SweepSettings {
    pub destroying_threshold_secs: i64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            destroying_threshold_secs: 900,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SecuritySettings {
    /// 32 byte key for env var encryption; set with `PREVIEWER__SECURITY__ENCRYPTION_KEY`
    #[serde(default)]
    pub encryption_key: String,
    #[serde(default = "default_env_var_cap")]
    pub max_env_vars_per_project: i64,
}

fn default_max_payload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_replay_ttl_secs() -> u64 {
    3600
}

fn default_rate_limit() -> u32 {
    30
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_attempts() -> usize {
    3
}

fn default_env_var_cap() -> i64 {
    100
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port,
        )
    }
}

impl WebhookSettings {
    pub fn replay_ttl(&self) -> Duration {
        Duration::from_secs(self.replay_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl ReconcileSettings {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs)
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration"))
        // PREVIEWER__WEBHOOK__SECRET=... overrides webhook.secret
        .add_source(
            config::Environment::with_prefix("PREVIEWER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}
