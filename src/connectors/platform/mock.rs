use super::{App, BuildContext, ComputePlatform, DeployConfig};
use crate::connectors::ConnectorError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Holds a `deploy` call open until the test releases it.
#[derive(Default)]
pub struct DeployGate {
    pub started: Notify,
    pub release: Notify,
}

/// In-memory platform for tests. Names listed in `foreign` behave as if
/// another account already owns them.
#[derive(Default)]
pub struct MockPlatform {
    pub apps: Mutex<HashMap<String, App>>,
    pub foreign: Mutex<HashSet<String>>,
    pub deploys: Mutex<Vec<(String, DeployConfig)>>,
    pub deletes: Mutex<Vec<String>>,
    pub fail_deploy: Mutex<Option<ConnectorError>>,
    pub fail_delete: Mutex<Option<ConnectorError>>,
    pub gate: Option<Arc<DeployGate>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_foreign_name(self, name: &str) -> Self {
        self.foreign.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn failing_deploy(self, err: ConnectorError) -> Self {
        *self.fail_deploy.lock().unwrap() = Some(err);
        self
    }

    pub fn failing_delete(self, err: ConnectorError) -> Self {
        *self.fail_delete.lock().unwrap() = Some(err);
        self
    }

    pub fn gated(mut self, gate: Arc<DeployGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn has_app(&self, name: &str) -> bool {
        self.apps.lock().unwrap().contains_key(name)
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ComputePlatform for MockPlatform {
    async fn create_app(&self, name: &str) -> Result<App, ConnectorError> {
        if self.foreign.lock().unwrap().contains(name) {
            return Err(ConnectorError::NameTaken(format!("{} is taken", name)));
        }
        let app = App {
            name: name.to_string(),
            hostname: Some(format!("{}.preview.test", name)),
            status: Some("pending".to_string()),
        };
        self.apps
            .lock()
            .unwrap()
            .insert(name.to_string(), app.clone());
        Ok(app)
    }

    async fn get_app(&self, name: &str) -> Result<Option<App>, ConnectorError> {
        Ok(self.apps.lock().unwrap().get(name).cloned())
    }

    async fn delete_app(&self, name: &str) -> Result<(), ConnectorError> {
        if let Some(err) = self.fail_delete.lock().unwrap().clone() {
            return Err(err);
        }
        self.deletes.lock().unwrap().push(name.to_string());
        self.apps.lock().unwrap().remove(name);
        Ok(())
    }

    async fn deploy(
        &self,
        app_name: &str,
        _build_context: BuildContext,
        config: &DeployConfig,
    ) -> Result<String, ConnectorError> {
        if let Some(gate) = &self.gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        if let Some(err) = self.fail_deploy.lock().unwrap().clone() {
            return Err(err);
        }
        self.deploys
            .lock()
            .unwrap()
            .push((app_name.to_string(), config.clone()));
        Ok(format!("https://{}.preview.test", app_name))
    }
}
