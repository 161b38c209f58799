use super::{Decide, DeploymentStore, ProjectStore, StatusChange, StoreError};
use crate::configuration::ReconcileSettings;
use crate::db;
use crate::helpers::retry::retry;
use crate::models::{Deployment, DeploymentLog, DeploymentStatus, EnvVar, LogLevel, Project};
use crate::services::app_name;
use crate::services::reconciler::{PrAction, ReconcileRequest, Reconciled, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::time::Duration;

const TX_RETRY_BASE: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    tx_max_attempts: u32,
}

impl PgStore {
    pub fn new(pool: PgPool, settings: &ReconcileSettings) -> Self {
        Self {
            pool,
            lock_timeout_ms: settings.lock_timeout_ms,
            tx_max_attempts: settings.tx_max_attempts,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn reconcile_once(
        &self,
        request: &ReconcileRequest,
        decide: Decide<'_>,
    ) -> Result<Reconciled, StoreError> {
        let mut tx = db::tx::begin_serializable(&self.pool, self.lock_timeout_ms).await?;
        db::tx::lock_pr(&mut tx, request.project_id, request.pr_number).await?;

        let latest =
            db::deployment::latest_for_pr(&mut tx, request.project_id, request.pr_number).await?;
        let transition = decide(latest.as_ref());

        let deployment = match (transition, &request.action) {
            (
                Transition::CreateNew,
                PrAction::CreateOrUpdate {
                    commit_sha,
                    branch,
                    title,
                },
            ) => {
                let candidates = app_name::candidates(&request.app_name_prefix, request.pr_number);
                let name = first_free_name(&mut tx, candidates).await?;
                let row = Deployment::new(
                    request.project_id,
                    request.pr_number,
                    title.clone(),
                    branch.clone(),
                    commit_sha.clone(),
                    name,
                );
                Some(db::deployment::insert(&mut tx, &row).await?)
            }
            (
                Transition::ResetAndRedeploy(id),
                PrAction::CreateOrUpdate {
                    commit_sha,
                    branch,
                    title,
                },
            ) => Some(db::deployment::reset(&mut tx, id, commit_sha, branch, title).await?),
            (Transition::Destroy(id), _) => {
                db::deployment::set_status(
                    &mut tx,
                    id,
                    &[DeploymentStatus::Active, DeploymentStatus::Failed],
                    &StatusChange::to(DeploymentStatus::Destroying),
                )
                .await?
            }
            (Transition::SkipInFlight(id), PrAction::Teardown) => {
                Some(db::deployment::mark_teardown_requested(&mut tx, id).await?)
            }
            _ => latest,
        };

        tx.commit().await?;
        Ok(Reconciled {
            transition,
            deployment,
        })
    }
}

async fn first_free_name(
    conn: &mut PgConnection,
    candidates: Vec<String>,
) -> Result<String, StoreError> {
    for candidate in candidates {
        if !db::deployment::app_name_taken(conn, &candidate).await? {
            return Ok(candidate);
        }
        tracing::debug!(candidate = %candidate, "App name already held");
    }
    Err(StoreError::Validation(format!(
        "no free app name after {} attempts",
        app_name::MAX_NAME_ATTEMPTS
    )))
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn active_by_repository(
        &self,
        repository_id: i64,
    ) -> Result<Option<Project>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::project::fetch_active_by_repository(&mut conn, repository_id).await
    }

    async fn fetch_project(&self, id: i32) -> Result<Option<Project>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::project::fetch(&mut conn, id).await
    }

    async fn deactivate_project(&self, id: i32) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::project::deactivate(&mut conn, id).await
    }

    async fn update_repository(
        &self,
        id: i32,
        owner: &str,
        name: &str,
        full_name: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::project::update_repository(&mut conn, id, owner, name, full_name).await
    }

    async fn env_vars(&self, project_id: i32) -> Result<Vec<EnvVar>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::env_var::fetch_by_project(&mut conn, project_id).await
    }

    async fn upsert_env_var(
        &self,
        project_id: i32,
        key: &str,
        stored_value: &str,
        is_secret: bool,
        cap: i64,
    ) -> Result<EnvVar, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !db::env_var::exists(&mut tx, project_id, key).await?
            && db::env_var::count_by_project(&mut tx, project_id).await? >= cap
        {
            return Err(StoreError::Validation(format!(
                "project {} already has the maximum of {} env vars",
                project_id, cap
            )));
        }
        let var = db::env_var::upsert(&mut tx, project_id, key, stored_value, is_secret).await?;
        tx.commit().await?;
        Ok(var)
    }
}

#[async_trait]
impl DeploymentStore for PgStore {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        decide: Decide<'_>,
    ) -> Result<Reconciled, StoreError> {
        retry(
            self.tx_max_attempts,
            TX_RETRY_BASE,
            StoreError::is_retryable,
            || self.reconcile_once(request, decide),
        )
        .await
    }

    async fn fetch(&self, id: i32) -> Result<Option<Deployment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment::fetch(&mut conn, id).await
    }

    async fn transition(
        &self,
        id: i32,
        from: &[DeploymentStatus],
        change: StatusChange,
    ) -> Result<Option<Deployment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment::set_status(&mut conn, id, from, &change).await
    }

    async fn reassign_app_name(
        &self,
        id: i32,
        prefix: &str,
        pr_number: i32,
    ) -> Result<String, StoreError> {
        let mut tx = self.pool.begin().await?;
        let name = first_free_name(&mut tx, app_name::suffixed_candidates(prefix, pr_number)).await?;
        db::deployment::update_app_name(&mut tx, id, &name).await?;
        tx.commit().await?;
        Ok(name)
    }

    async fn append_log(
        &self,
        deployment_id: i32,
        level: LogLevel,
        step: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment_log::insert(&mut conn, deployment_id, level, step, message).await
    }

    async fn logs(&self, deployment_id: i32) -> Result<Vec<DeploymentLog>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment_log::fetch_by_deployment(&mut conn, deployment_id).await
    }

    async fn stuck_destroying(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Deployment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment::stuck_destroying(&mut conn, older_than).await
    }

    async fn orphaned(&self) -> Result<Vec<Deployment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment::orphaned(&mut conn).await
    }

    async fn live_for_project(&self, project_id: i32) -> Result<Vec<Deployment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::deployment::live_for_project(&mut conn, project_id).await
    }
}
