//! Periodic cleanup, run from `console sweep run` by an external scheduler.

use crate::models::{DeploymentStatus, LogLevel};
use crate::services::context::AppContext;
use crate::services::errors::DeployError;
use crate::services::teardown::{self, TeardownOutcome};
use crate::store::StatusChange;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;

pub const ORPHAN_REASON: &str = "project inactive or removed";

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub retried: usize,
    pub destroyed: usize,
    pub still_stuck: usize,
    pub orphans: usize,
}

/// Retry teardowns stuck in `destroying`, then force-close rows whose
/// project is gone or inactive.
#[tracing::instrument(name = "Sweep", skip(ctx))]
pub async fn run(ctx: &AppContext) -> Result<SweepReport, DeployError> {
    let mut report = SweepReport::default();
    let mut handled = HashSet::new();

    let threshold = Utc::now() - chrono::Duration::seconds(ctx.sweep.destroying_threshold_secs);
    for deployment in ctx.deployments.stuck_destroying(threshold).await? {
        handled.insert(deployment.id);
        report.retried += 1;
        let project = ctx.projects.fetch_project(deployment.project_id).await?;
        match teardown::execute(ctx, deployment.id, project.as_ref()).await {
            Ok(TeardownOutcome::Destroyed) => report.destroyed += 1,
            Ok(TeardownOutcome::Skipped) => {}
            Err(err) => {
                tracing::warn!(deployment_id = deployment.id, "Still stuck: {}", err);
                report.still_stuck += 1;
            }
        }
    }

    for deployment in ctx.deployments.orphaned().await? {
        if handled.contains(&deployment.id) {
            continue;
        }
        if let Err(err) = ctx.platform.delete_app(&deployment.app_name).await {
            tracing::warn!(app_name = %deployment.app_name, "Orphan app delete failed: {}", err);
        }
        let from = [
            DeploymentStatus::Pending,
            DeploymentStatus::Building,
            DeploymentStatus::Deploying,
            DeploymentStatus::Active,
            DeploymentStatus::Failed,
            DeploymentStatus::Destroying,
        ];
        let closed = ctx
            .deployments
            .transition(
                deployment.id,
                &from,
                StatusChange::force_destroyed(ORPHAN_REASON.to_string()),
            )
            .await?;
        if closed.is_some() {
            ctx.log_step(deployment.id, LogLevel::Error, "swept", ORPHAN_REASON)
                .await;
            report.orphans += 1;
        }
    }

    tracing::info!(
        retried = report.retried,
        destroyed = report.destroyed,
        still_stuck = report.still_stuck,
        orphans = report.orphans,
        "Sweep finished"
    );
    Ok(report)
}
