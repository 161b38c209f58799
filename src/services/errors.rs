use crate::connectors::ConnectorError;
use crate::store::StoreError;
use thiserror::Error;

/// Failures of the build/deploy and teardown executors.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Connector(#[from] ConnectorError),
    /// Checkout contents, Dockerfile or build context problems
    #[error("build preparation failed: {0}")]
    Build(String),
    /// Project settings or stored variables are unusable
    #[error("invalid project configuration: {0}")]
    Config(String),
    #[error("deployment {0} not found")]
    NotFound(i32),
}

impl DeployError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployError::Store(err) => err.is_retryable(),
            DeployError::Connector(err) => err.is_retryable(),
            _ => false,
        }
    }
}
