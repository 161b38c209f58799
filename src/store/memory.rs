use super::{Decide, DeploymentStore, ProjectStore, StatusChange, StoreError};
use crate::models::{
    Deployment, DeploymentLog, DeploymentStatus, EnvVar, LogLevel, Project, TEARDOWN_REQUESTED,
};
use crate::services::app_name;
use crate::services::reconciler::{PrAction, ReconcileRequest, Reconciled, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    projects: Vec<Project>,
    deployments: Vec<Deployment>,
    env_vars: Vec<EnvVar>,
    logs: Vec<DeploymentLog>,
    next_id: i32,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn latest_for_pr(&self, project_id: i32, pr_number: i32) -> Option<&Deployment> {
        self.deployments
            .iter()
            .filter(|d| d.project_id == project_id && d.pr_number == pr_number)
            .max_by_key(|d| (d.created_at, d.id))
    }

    fn app_name_taken(&self, name: &str) -> bool {
        self.deployments
            .iter()
            .any(|d| d.app_name == name && d.status != DeploymentStatus::Destroyed)
    }

    fn first_free_name(&self, candidates: Vec<String>) -> Result<String, StoreError> {
        candidates
            .into_iter()
            .find(|c| !self.app_name_taken(c))
            .ok_or_else(|| StoreError::Validation("no free app name".to_string()))
    }

    fn deployment_mut(&mut self, id: i32) -> Option<&mut Deployment> {
        self.deployments.iter_mut().find(|d| d.id == id)
    }

    /// Mirrors the partial unique indexes of the schema.
    fn insert(&mut self, mut row: Deployment) -> Result<Deployment, StoreError> {
        if self.app_name_taken(&row.app_name) {
            return Err(StoreError::Duplicate(row.app_name));
        }
        if self.deployments.iter().any(|d| {
            d.project_id == row.project_id
                && d.pr_number == row.pr_number
                && !d.status.is_teardown()
        }) {
            return Err(StoreError::Duplicate(format!("live row for PR {}", row.pr_number)));
        }
        row.id = self.next_id();
        self.deployments.push(row.clone());
        Ok(row)
    }
}

/// In-memory store. One mutex around all state makes `reconcile` atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    injected_lock_timeouts: std::sync::Mutex<u32>,
    injected_write_conflicts: std::sync::Mutex<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_project(&self, mut project: Project) -> Project {
        let mut state = self.state.lock().await;
        project.id = state.next_id();
        state.projects.push(project.clone());
        project
    }

    pub async fn add_deployment(&self, deployment: Deployment) -> Deployment {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let mut deployment = deployment;
        deployment.id = id;
        state.deployments.push(deployment.clone());
        deployment
    }

    pub async fn deployment(&self, id: i32) -> Option<Deployment> {
        self.state
            .lock()
            .await
            .deployments
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    pub async fn deployments_for_pr(&self, project_id: i32, pr_number: i32) -> Vec<Deployment> {
        self.state
            .lock()
            .await
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id && d.pr_number == pr_number)
            .cloned()
            .collect()
    }

    pub async fn all_deployments(&self) -> Vec<Deployment> {
        self.state.lock().await.deployments.clone()
    }

    /// Shift a row's timestamps into the past.
    pub async fn age_deployment(&self, id: i32, by: chrono::Duration) {
        let mut state = self.state.lock().await;
        if let Some(d) = state.deployment_mut(id) {
            d.started_at = d.started_at.map(|t| t - by);
            d.created_at = d.created_at - by;
            d.updated_at = d.updated_at - by;
        }
    }

    /// The next `count` reconcile calls fail as if the PR lock timed out.
    pub fn fail_next_reconciles(&self, count: u32) {
        *self.injected_lock_timeouts.lock().unwrap() = count;
    }

    /// The next `count` status writes fail with a serialization conflict.
    pub fn fail_next_transitions(&self, count: u32) {
        *self.injected_write_conflicts.lock().unwrap() = count;
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn active_by_repository(
        &self,
        repository_id: i64,
    ) -> Result<Option<Project>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .projects
            .iter()
            .find(|p| p.repository_id == repository_id && p.active)
            .cloned())
    }

    async fn fetch_project(&self, id: i32) -> Result<Option<Project>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .projects
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn deactivate_project(&self, id: i32) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.projects.iter_mut().find(|p| p.id == id && p.active) {
            Some(project) => {
                project.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_repository(
        &self,
        id: i32,
        owner: &str,
        name: &str,
        full_name: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(project) = state.projects.iter_mut().find(|p| p.id == id) {
            project.repository_owner = owner.to_string();
            project.repository_name = name.to_string();
            project.repository_full_name = full_name.to_string();
        }
        Ok(())
    }

    async fn env_vars(&self, project_id: i32) -> Result<Vec<EnvVar>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .env_vars
            .iter()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn upsert_env_var(
        &self,
        project_id: i32,
        key: &str,
        stored_value: &str,
        is_secret: bool,
        cap: i64,
    ) -> Result<EnvVar, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(var) = state
            .env_vars
            .iter_mut()
            .find(|v| v.project_id == project_id && v.key == key)
        {
            var.value = stored_value.to_string();
            var.is_secret = is_secret;
            var.updated_at = Utc::now();
            return Ok(var.clone());
        }
        let count = state
            .env_vars
            .iter()
            .filter(|v| v.project_id == project_id)
            .count() as i64;
        if count >= cap {
            return Err(StoreError::Validation(format!(
                "project {} already has the maximum of {} env vars",
                project_id, cap
            )));
        }
        let var = EnvVar {
            id: state.next_id(),
            project_id,
            key: key.to_string(),
            value: stored_value.to_string(),
            is_secret,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.env_vars.push(var.clone());
        Ok(var)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        decide: Decide<'_>,
    ) -> Result<Reconciled, StoreError> {
        {
            let mut injected = self.injected_lock_timeouts.lock().unwrap();
            if *injected > 0 {
                *injected -= 1;
                return Err(StoreError::LockTimeout);
            }
        }

        let mut state = self.state.lock().await;
        let latest = state
            .latest_for_pr(request.project_id, request.pr_number)
            .cloned();
        let transition = decide(latest.as_ref());
        let now = Utc::now();

        let deployment = match (transition, &request.action) {
            (
                Transition::CreateNew,
                PrAction::CreateOrUpdate {
                    commit_sha,
                    branch,
                    title,
                },
            ) => {
                let name = state.first_free_name(app_name::candidates(
                    &request.app_name_prefix,
                    request.pr_number,
                ))?;
                let row = Deployment::new(
                    request.project_id,
                    request.pr_number,
                    title.clone(),
                    branch.clone(),
                    commit_sha.clone(),
                    name,
                );
                Some(state.insert(row)?)
            }
            (
                Transition::ResetAndRedeploy(id),
                PrAction::CreateOrUpdate {
                    commit_sha,
                    branch,
                    title,
                },
            ) => state.deployment_mut(id).map(|d| {
                d.commit_sha = commit_sha.clone();
                d.branch = branch.clone();
                d.pr_title = title.clone();
                d.status = DeploymentStatus::Pending;
                d.error_message = None;
                d.completed_at = None;
                d.started_at = Some(now);
                if let Value::Object(map) = &mut d.metadata {
                    map.remove(TEARDOWN_REQUESTED);
                }
                d.updated_at = now;
                d.clone()
            }),
            (Transition::Destroy(id), _) => state
                .deployment_mut(id)
                .filter(|d| {
                    matches!(d.status, DeploymentStatus::Active | DeploymentStatus::Failed)
                })
                .map(|d| {
                    d.status = DeploymentStatus::Destroying;
                    d.updated_at = now;
                    d.clone()
                }),
            (Transition::SkipInFlight(id), PrAction::Teardown) => {
                state.deployment_mut(id).map(|d| {
                    if let Value::Object(map) = &mut d.metadata {
                        map.insert(TEARDOWN_REQUESTED.to_string(), Value::Bool(true));
                    }
                    d.updated_at = now;
                    d.clone()
                })
            }
            _ => latest,
        };

        Ok(Reconciled {
            transition,
            deployment,
        })
    }

    async fn fetch(&self, id: i32) -> Result<Option<Deployment>, StoreError> {
        Ok(self.deployment(id).await)
    }

    async fn transition(
        &self,
        id: i32,
        from: &[DeploymentStatus],
        change: StatusChange,
    ) -> Result<Option<Deployment>, StoreError> {
        {
            let mut injected = self.injected_write_conflicts.lock().unwrap();
            if *injected > 0 {
                *injected -= 1;
                return Err(StoreError::Conflict("40001".to_string()));
            }
        }

        let mut state = self.state.lock().await;
        Ok(state
            .deployment_mut(id)
            .filter(|d| from.contains(&d.status))
            .map(|d| {
                d.status = change.to;
                if change.preview_url.is_some() {
                    d.preview_url = change.preview_url;
                }
                if change.error_message.is_some() {
                    d.error_message = change.error_message;
                }
                if change.completed_at.is_some() {
                    d.completed_at = change.completed_at;
                }
                if change.destroyed_at.is_some() {
                    d.destroyed_at = change.destroyed_at;
                }
                d.updated_at = Utc::now();
                d.clone()
            }))
    }

    async fn reassign_app_name(
        &self,
        id: i32,
        prefix: &str,
        pr_number: i32,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock().await;
        let name = state.first_free_name(app_name::suffixed_candidates(prefix, pr_number))?;
        match state.deployment_mut(id) {
            Some(d) => {
                d.app_name = name.clone();
                Ok(name)
            }
            None => Err(StoreError::Validation(format!("deployment {} not found", id))),
        }
    }

    async fn append_log(
        &self,
        deployment_id: i32,
        level: LogLevel,
        step: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let id = state.next_id() as i64;
        state.logs.push(DeploymentLog {
            id,
            deployment_id,
            level: level.as_str().to_string(),
            step: step.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn logs(&self, deployment_id: i32) -> Result<Vec<DeploymentLog>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .logs
            .iter()
            .filter(|l| l.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn stuck_destroying(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .deployments
            .iter()
            .filter(|d| d.status == DeploymentStatus::Destroying && d.updated_at < older_than)
            .cloned()
            .collect())
    }

    async fn orphaned(&self) -> Result<Vec<Deployment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.status != DeploymentStatus::Destroyed)
            .filter(|d| {
                !state
                    .projects
                    .iter()
                    .any(|p| p.id == d.project_id && p.active)
            })
            .cloned()
            .collect())
    }

    async fn live_for_project(&self, project_id: i32) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id && !d.status.is_teardown())
            .cloned()
            .collect())
    }
}
