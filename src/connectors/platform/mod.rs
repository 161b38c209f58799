//! Compute platform connector: the service that runs preview apps.

use crate::connectors::ConnectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod client;
#[cfg(test)]
pub mod mock;

pub use client::PlatformClient;
#[cfg(test)]
pub use mock::MockPlatform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Gzipped tarball of the checkout and the Dockerfile path inside it.
#[derive(Clone)]
pub struct BuildContext {
    pub archive: Vec<u8>,
    pub dockerfile: String,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("archive_bytes", &self.archive.len())
            .field("dockerfile", &self.dockerfile)
            .finish()
    }
}

/// Release configuration. `secrets` carries decrypted values and is kept out
/// of `Debug` output.
#[derive(Clone, Default)]
pub struct DeployConfig {
    pub descriptor: String,
    pub region: String,
    pub internal_port: u16,
    pub env: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("region", &self.region)
            .field("internal_port", &self.internal_port)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
pub trait ComputePlatform: Send + Sync {
    /// Fails with [`ConnectorError::NameTaken`] when another account owns the name.
    async fn create_app(&self, name: &str) -> Result<App, ConnectorError>;

    async fn get_app(&self, name: &str) -> Result<Option<App>, ConnectorError>;

    /// Succeeds when the app is already gone.
    async fn delete_app(&self, name: &str) -> Result<(), ConnectorError>;

    /// Build and release; returns the public URL of the running app.
    async fn deploy(
        &self,
        app_name: &str,
        build_context: BuildContext,
        config: &DeployConfig,
    ) -> Result<String, ConnectorError>;
}
