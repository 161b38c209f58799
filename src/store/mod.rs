//! Persistence seam.
//!
//! Executors and the reconcile path talk to [`ProjectStore`] and
//! [`DeploymentStore`] through `Arc<dyn ...>`; [`PgStore`] backs them with
//! Postgres, the in-memory store backs unit tests.

use crate::models::{Deployment, DeploymentLog, DeploymentStatus, EnvVar, LogLevel, Project};
use crate::services::reconciler::{ReconcileRequest, Reconciled, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod errors;
#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use errors::StoreError;
#[cfg(test)]
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Decision callback run inside the reconcile transaction.
pub type Decide<'a> = &'a (dyn Fn(Option<&Deployment>) -> Transition + Send + Sync);

/// Target of a conditional status write. Optional fields are left untouched
/// when `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub to: DeploymentStatus,
    pub preview_url: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: DeploymentStatus) -> Self {
        Self {
            to: status,
            preview_url: None,
            error_message: None,
            completed_at: None,
            destroyed_at: None,
        }
    }

    pub fn ready(preview_url: String) -> Self {
        Self {
            preview_url: Some(preview_url),
            completed_at: Some(Utc::now()),
            ..Self::to(DeploymentStatus::Active)
        }
    }

    pub fn failed(error_message: String) -> Self {
        Self {
            error_message: Some(error_message),
            completed_at: Some(Utc::now()),
            ..Self::to(DeploymentStatus::Failed)
        }
    }

    pub fn destroyed() -> Self {
        Self {
            destroyed_at: Some(Utc::now()),
            ..Self::to(DeploymentStatus::Destroyed)
        }
    }

    pub fn force_destroyed(reason: String) -> Self {
        Self {
            error_message: Some(reason),
            ..Self::destroyed()
        }
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn active_by_repository(&self, repository_id: i64)
        -> Result<Option<Project>, StoreError>;

    async fn fetch_project(&self, id: i32) -> Result<Option<Project>, StoreError>;

    async fn deactivate_project(&self, id: i32) -> Result<bool, StoreError>;

    async fn update_repository(
        &self,
        id: i32,
        owner: &str,
        name: &str,
        full_name: &str,
    ) -> Result<(), StoreError>;

    async fn env_vars(&self, project_id: i32) -> Result<Vec<EnvVar>, StoreError>;

    /// Insert or replace one variable; new keys beyond `cap` are refused.
    async fn upsert_env_var(
        &self,
        project_id: i32,
        key: &str,
        stored_value: &str,
        is_secret: bool,
        cap: i64,
    ) -> Result<EnvVar, StoreError>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Lock the PR, read its latest row, run `decide`, apply the decision and
    /// commit, all as one unit.
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        decide: Decide<'_>,
    ) -> Result<Reconciled, StoreError>;

    async fn fetch(&self, id: i32) -> Result<Option<Deployment>, StoreError>;

    /// Apply `change` only when the row currently is in one of `from`.
    async fn transition(
        &self,
        id: i32,
        from: &[DeploymentStatus],
        change: StatusChange,
    ) -> Result<Option<Deployment>, StoreError>;

    /// Give the row a fresh suffixed app name after the platform refused the
    /// current one.
    async fn reassign_app_name(
        &self,
        id: i32,
        prefix: &str,
        pr_number: i32,
    ) -> Result<String, StoreError>;

    async fn append_log(
        &self,
        deployment_id: i32,
        level: LogLevel,
        step: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    async fn logs(&self, deployment_id: i32) -> Result<Vec<DeploymentLog>, StoreError>;

    async fn stuck_destroying(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Deployment>, StoreError>;

    async fn orphaned(&self) -> Result<Vec<Deployment>, StoreError>;

    async fn live_for_project(&self, project_id: i32) -> Result<Vec<Deployment>, StoreError>;
}
