use crate::configuration::{
    PlatformSettings, ReconcileSettings, Settings, SweepSettings, WorkerSettings,
};
use crate::connectors::{ComputePlatform, GithubClient, PlatformClient, SourceControl};
use crate::helpers::SecretCipher;
use crate::models::{LogLevel, Project};
use crate::services::descriptor::DescriptorRenderer;
use crate::services::notifier::Notifier;
use crate::store::{DeploymentStore, PgStore, ProjectStore};
use sqlx::PgPool;
use std::sync::Arc;

/// Everything the pipeline needs, shared by workers, the sweep and the
/// console. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub projects: Arc<dyn ProjectStore>,
    pub deployments: Arc<dyn DeploymentStore>,
    pub platform: Arc<dyn ComputePlatform>,
    pub source_control: Arc<dyn SourceControl>,
    pub notifier: Notifier,
    pub renderer: Arc<DescriptorRenderer>,
    pub cipher: SecretCipher,
    pub platform_settings: PlatformSettings,
    pub reconcile: ReconcileSettings,
    pub worker: WorkerSettings,
    pub sweep: SweepSettings,
}

impl AppContext {
    pub fn new(
        settings: &Settings,
        projects: Arc<dyn ProjectStore>,
        deployments: Arc<dyn DeploymentStore>,
        platform: Arc<dyn ComputePlatform>,
        source_control: Arc<dyn SourceControl>,
    ) -> anyhow::Result<Self> {
        let cipher = SecretCipher::new(&settings.security.encryption_key)
            .map_err(|err| anyhow::anyhow!("security.encryption_key: {}", err))?;
        Ok(Self {
            notifier: Notifier::new(source_control.clone(), &settings.notifier),
            projects,
            deployments,
            platform,
            source_control,
            renderer: Arc::new(DescriptorRenderer::new()?),
            cipher,
            platform_settings: settings.platform.clone(),
            reconcile: settings.reconcile.clone(),
            worker: settings.worker.clone(),
            sweep: settings.sweep.clone(),
        })
    }

    /// Production wiring: Postgres store plus the HTTP clients.
    pub fn connect(settings: &Settings, pool: PgPool) -> anyhow::Result<Self> {
        let store = Arc::new(PgStore::new(pool, &settings.reconcile));
        let platform = PlatformClient::new(&settings.platform)?;
        let source_control = GithubClient::new(&settings.source_control)?;
        Self::new(
            settings,
            store.clone(),
            store,
            Arc::new(platform),
            Arc::new(source_control),
        )
    }

    /// Append to the deployment's diagnostic trail. Never fails the caller.
    pub async fn log_step(&self, deployment_id: i32, level: LogLevel, step: &str, message: &str) {
        if let Err(err) = self
            .deployments
            .append_log(deployment_id, level, step, message)
            .await
        {
            tracing::warn!(deployment_id, step, "deployment log not written: {}", err);
        }
    }

    pub fn region_for(&self, project: &Project) -> String {
        if project.region.trim().is_empty() {
            self.platform_settings.default_region.clone()
        } else {
            project.region.clone()
        }
    }
}
