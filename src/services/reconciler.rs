//! Reconciliation engine.
//!
//! Given the latest deployment row for a (project, PR) pair and what the
//! webhook asked for, [`decide`] picks exactly one [`Transition`]. The decision
//! and the write that applies it happen inside one store transaction guarded
//! by the per-PR lock, so concurrent deliveries for the same PR serialize here.

use crate::configuration::ReconcileSettings;
use crate::models::{Deployment, DeploymentStatus};
use crate::store::{DeploymentStore, StoreError};
use chrono::{DateTime, Duration, Utc};

/// What a pull request event asks for once ingress has classified it.
#[derive(Debug, Clone, PartialEq)]
pub enum PrAction {
    CreateOrUpdate {
        commit_sha: String,
        branch: String,
        title: String,
    },
    Teardown,
}

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub project_id: i32,
    pub pr_number: i32,
    pub app_name_prefix: String,
    pub action: PrAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CreateNew,
    ResetAndRedeploy(i32),
    SkipInFlight(i32),
    SkipCooldown(i32),
    Destroy(i32),
    SkipNoop,
}

impl Transition {
    pub fn label(&self) -> &'static str {
        match self {
            Transition::CreateNew => "create_new",
            Transition::ResetAndRedeploy(_) => "reset_and_redeploy",
            Transition::SkipInFlight(_) => "skip_in_flight",
            Transition::SkipCooldown(_) => "skip_cooldown",
            Transition::Destroy(_) => "destroy",
            Transition::SkipNoop => "skip_noop",
        }
    }
}

/// Outcome of a reconcile call; `deployment` is the row after the write.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub transition: Transition,
    pub deployment: Option<Deployment>,
}

impl Reconciled {
    /// The row needs the build and deploy executor.
    pub fn needs_deploy(&self) -> bool {
        matches!(
            self.transition,
            Transition::CreateNew | Transition::ResetAndRedeploy(_)
        )
    }

    pub fn needs_teardown(&self) -> bool {
        matches!(self.transition, Transition::Destroy(_))
    }
}

pub fn decide(
    latest: Option<&Deployment>,
    action: &PrAction,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Transition {
    let latest = match latest {
        Some(latest) => latest,
        None => {
            return match action {
                PrAction::CreateOrUpdate { .. } => Transition::CreateNew,
                PrAction::Teardown => Transition::SkipNoop,
            }
        }
    };

    match (action, latest.status) {
        (_, status) if status.is_in_flight() => Transition::SkipInFlight(latest.id),

        (PrAction::CreateOrUpdate { .. }, DeploymentStatus::Active) => {
            if now - latest.cooldown_anchor() < cooldown {
                Transition::SkipCooldown(latest.id)
            } else {
                Transition::ResetAndRedeploy(latest.id)
            }
        }
        (PrAction::CreateOrUpdate { .. }, DeploymentStatus::Failed) => {
            Transition::ResetAndRedeploy(latest.id)
        }
        (PrAction::CreateOrUpdate { .. }, _) => Transition::CreateNew,

        (PrAction::Teardown, DeploymentStatus::Active | DeploymentStatus::Failed) => {
            Transition::Destroy(latest.id)
        }
        (PrAction::Teardown, _) => Transition::SkipNoop,
    }
}

/// Decide and apply under the per-PR lock.
#[tracing::instrument(
    name = "Reconcile pull request",
    skip(store, settings),
    fields(project_id = request.project_id, pr_number = request.pr_number)
)]
pub async fn reconcile(
    store: &dyn DeploymentStore,
    request: &ReconcileRequest,
    settings: &ReconcileSettings,
) -> Result<Reconciled, StoreError> {
    let cooldown = settings.cooldown();
    let action = request.action.clone();
    let reconciled = store
        .reconcile(request, &move |latest: Option<&Deployment>| {
            decide(latest, &action, Utc::now(), cooldown)
        })
        .await?;

    tracing::info!(
        transition = reconciled.transition.label(),
        deployment_id = ?reconciled.deployment.as_ref().map(|d| d.id),
        "Reconciled"
    );
    Ok(reconciled)
}
