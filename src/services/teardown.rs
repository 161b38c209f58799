use crate::models::{DeploymentStatus, LogLevel, Project};
use crate::services::context::AppContext;
use crate::services::errors::DeployError;
use crate::services::notifier::{self, CommentTarget};
use crate::store::StatusChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Row is not `destroying`; someone else finished it or it never started.
    Skipped,
    Destroyed,
}

/// Delete the platform app of a `destroying` row and mark it destroyed. A
/// failed delete leaves the row `destroying` so the sweep picks it up.
#[tracing::instrument(name = "Teardown preview", skip(ctx, project))]
pub async fn execute(
    ctx: &AppContext,
    deployment_id: i32,
    project: Option<&Project>,
) -> Result<TeardownOutcome, DeployError> {
    let deployment = ctx
        .deployments
        .fetch(deployment_id)
        .await?
        .ok_or(DeployError::NotFound(deployment_id))?;
    if deployment.status != DeploymentStatus::Destroying {
        tracing::info!(status = %deployment.status, "Not destroying, nothing to do");
        return Ok(TeardownOutcome::Skipped);
    }

    if let Err(err) = ctx.platform.delete_app(&deployment.app_name).await {
        tracing::warn!(app_name = %deployment.app_name, "App delete failed: {}", err);
        ctx.log_step(deployment_id, LogLevel::Error, "delete", &err.to_string())
            .await;
        return Err(err.into());
    }

    let destroyed = ctx
        .deployments
        .transition(
            deployment_id,
            &[DeploymentStatus::Destroying],
            StatusChange::destroyed(),
        )
        .await
        .map_err(|err| {
            tracing::error!(
                deployment_id,
                project_id = deployment.project_id,
                pr_number = deployment.pr_number,
                "Could not record destroyed status: {}",
                err
            );
            err
        })?;
    if destroyed.is_none() {
        // a concurrent run got there first and already commented
        return Ok(TeardownOutcome::Skipped);
    }
    ctx.log_step(deployment_id, LogLevel::Info, "destroyed", &deployment.app_name)
        .await;

    if let Some(project) = project {
        ctx.notifier
            .post(
                &CommentTarget::for_project(project, deployment.pr_number),
                &notifier::destroyed_message(&deployment.app_name),
            )
            .await;
    }
    Ok(TeardownOutcome::Destroyed)
}
