//! Build & deploy executor.
//!
//! Runs outside any transaction. Each status write is conditional on the
//! previous status, so a duplicate job for the same row does nothing.

use crate::connectors::{BuildContext, ConnectorError, DeployConfig};
use crate::helpers::archive::pack_build_context;
use crate::helpers::dockerfile::prepare_build_inputs;
use crate::helpers::retry::retry;
use crate::helpers::sanitize::sanitize_error;
use crate::models::{Deployment, DeploymentStatus, LogLevel, Project};
use crate::services::context::AppContext;
use crate::services::descriptor::{resolve_env, DescriptorContext};
use crate::services::errors::DeployError;
use crate::services::notifier::{self, CommentTarget};
use crate::store::{StatusChange, StoreError};
use std::path::PathBuf;
use std::time::Duration;

/// Renames tried after the platform reports the app name as taken.
const MAX_RENAMES: usize = 3;

const WRITE_RETRY_BASE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    /// Row was not pending; another run owns it.
    Skipped,
    Ready(String),
    Failed(String),
    /// Row left the create path while the build ran, e.g. swept as an orphan.
    Superseded,
}

/// Conditional status write, retried while the store reports a transient
/// error so the row is not stranded mid-flight.
async fn write_status(
    ctx: &AppContext,
    deployment_id: i32,
    from: &[DeploymentStatus],
    change: StatusChange,
) -> Result<Option<Deployment>, StoreError> {
    retry(
        ctx.reconcile.tx_max_attempts,
        WRITE_RETRY_BASE,
        StoreError::is_retryable,
        || ctx.deployments.transition(deployment_id, from, change.clone()),
    )
    .await
}

#[tracing::instrument(name = "Deploy preview", skip(ctx, project), fields(project_id = project.id))]
pub async fn execute(
    ctx: &AppContext,
    deployment_id: i32,
    project: &Project,
) -> Result<DeployOutcome, DeployError> {
    let deployment = match write_status(
        ctx,
        deployment_id,
        &[DeploymentStatus::Pending],
        StatusChange::to(DeploymentStatus::Building),
    )
    .await?
    {
        Some(deployment) => deployment,
        None => {
            tracing::info!("Deployment is not pending, nothing to do");
            return Ok(DeployOutcome::Skipped);
        }
    };

    let target = CommentTarget::for_project(project, deployment.pr_number);
    ctx.log_step(
        deployment_id,
        LogLevel::Info,
        "building",
        &format!("building {} at {}", deployment.app_name, deployment.commit_sha),
    )
    .await;
    ctx.notifier
        .post(
            &target,
            &notifier::building_message(&deployment.app_name, &deployment.commit_sha),
        )
        .await;

    let mut secrets: Vec<String> = vec![];
    match run(ctx, &deployment, project, &mut secrets).await {
        Ok((app_name, preview_url)) => {
            let written = write_status(
                ctx,
                deployment_id,
                &[DeploymentStatus::Deploying],
                StatusChange::ready(preview_url.clone()),
            )
            .await
            .map_err(|err| {
                tracing::error!(
                    deployment_id,
                    project_id = project.id,
                    pr_number = deployment.pr_number,
                    "Could not record ready status: {}",
                    err
                );
                err
            })?;
            if written.is_none() {
                release_superseded(ctx, deployment_id, &app_name).await;
                return Ok(DeployOutcome::Superseded);
            }
            ctx.log_step(deployment_id, LogLevel::Info, "ready", &preview_url)
                .await;
            ctx.notifier
                .post(
                    &target,
                    &notifier::ready_message(&preview_url, &deployment.commit_sha),
                )
                .await;
            Ok(DeployOutcome::Ready(preview_url))
        }
        Err(err) => {
            tracing::warn!("Deployment failed: {}", err);
            let message = sanitize_error(&err.to_string(), &secrets);
            let written = write_status(
                ctx,
                deployment_id,
                &[DeploymentStatus::Building, DeploymentStatus::Deploying],
                StatusChange::failed(message.clone()),
            )
            .await
            .map_err(|store_err| {
                tracing::error!(
                    deployment_id,
                    project_id = project.id,
                    pr_number = deployment.pr_number,
                    "Could not record failed status: {}",
                    store_err
                );
                store_err
            })?;
            let row = match written {
                Some(row) => row,
                None => {
                    let app_name = ctx
                        .deployments
                        .fetch(deployment_id)
                        .await
                        .ok()
                        .flatten()
                        .map(|row| row.app_name)
                        .unwrap_or_else(|| deployment.app_name.clone());
                    release_superseded(ctx, deployment_id, &app_name).await;
                    return Ok(DeployOutcome::Superseded);
                }
            };
            ctx.log_step(row.id, LogLevel::Error, "failed", &message)
                .await;
            ctx.notifier
                .post(
                    &target,
                    &notifier::failed_message(&message, &deployment.commit_sha),
                )
                .await;
            Ok(DeployOutcome::Failed(message))
        }
    }
}

/// The row was moved off the create path by someone else; whoever did that
/// already commented. Only the app this run may have created is cleaned up.
async fn release_superseded(ctx: &AppContext, deployment_id: i32, app_name: &str) {
    tracing::warn!(deployment_id, app_name, "Deployment superseded during build, releasing app");
    if let Err(err) = ctx.platform.delete_app(app_name).await {
        tracing::warn!(deployment_id, app_name, "Could not delete superseded app: {}", err);
    }
}

/// Everything between `building` and the release; yields the app name and
/// preview url. Values pushed to `secrets` are redacted from any error that
/// escapes.
async fn run(
    ctx: &AppContext,
    deployment: &Deployment,
    project: &Project,
    secrets: &mut Vec<String>,
) -> Result<(String, String), DeployError> {
    let id = deployment.id;
    let config = project.build_config().validated().map_err(DeployError::Config)?;

    let token = ctx
        .source_control
        .installation_token(project.installation_id)
        .await?;
    secrets.push(token.clone());

    // Removed on drop, whatever happens below
    let checkout = tempfile::TempDir::new()
        .map_err(|err| DeployError::Build(format!("temp dir: {}", err)))?;
    ctx.source_control
        .clone_at(
            &project.repository_full_name,
            &token,
            &deployment.commit_sha,
            checkout.path(),
        )
        .await?;
    ctx.log_step(id, LogLevel::Info, "clone", "checked out commit")
        .await;

    let inputs = prepare_build_inputs(checkout.path(), &config).map_err(DeployError::Build)?;
    ctx.log_step(
        id,
        LogLevel::Info,
        "prepare",
        &format!("using {} ({:?})", inputs.dockerfile, inputs.source),
    )
    .await;

    let vars = ctx.projects.env_vars(project.id).await?;
    let env = resolve_env(&config.env_vars, &vars, &ctx.cipher).map_err(DeployError::Config)?;
    secrets.extend(env.secret_values());

    if write_status(
        ctx,
        id,
        &[DeploymentStatus::Building],
        StatusChange::to(DeploymentStatus::Deploying),
    )
    .await?
    .is_none()
    {
        return Err(DeployError::Build("deployment left building state".to_string()));
    }

    let app_name = ensure_app(ctx, deployment, project).await?;
    ctx.log_step(id, LogLevel::Info, "app", &app_name).await;

    let descriptor = ctx
        .renderer
        .render(&DescriptorContext {
            app_name: app_name.clone(),
            region: ctx.region_for(project),
            cpus: ctx.platform_settings.cpus,
            memory_mb: ctx.platform_settings.memory_mb,
            internal_port: inputs.internal_port,
            dockerfile: inputs.dockerfile.clone(),
            env: env.plain.clone(),
            pr_number: deployment.pr_number,
            commit_sha: deployment.commit_sha.clone(),
        })
        .map_err(|err| DeployError::Config(err.to_string()))?;

    let root: PathBuf = checkout.path().to_path_buf();
    let archive = tokio::task::spawn_blocking(move || pack_build_context(&root))
        .await
        .map_err(|err| DeployError::Build(format!("packing task: {}", err)))?
        .map_err(DeployError::Build)?;
    ctx.log_step(
        id,
        LogLevel::Info,
        "package",
        &format!("build context {} bytes", archive.len()),
    )
    .await;

    let deploy_config = DeployConfig {
        descriptor,
        region: ctx.region_for(project),
        internal_port: inputs.internal_port,
        env: env.plain,
        secrets: env.secrets,
    };
    let url = ctx
        .platform
        .deploy(
            &app_name,
            BuildContext {
                archive,
                dockerfile: inputs.dockerfile,
            },
            &deploy_config,
        )
        .await?;
    Ok((app_name, url))
}

/// Make sure the platform app exists, renaming the row when the platform
/// says someone else holds the name.
async fn ensure_app(
    ctx: &AppContext,
    deployment: &Deployment,
    project: &Project,
) -> Result<String, DeployError> {
    let mut app_name = deployment.app_name.clone();
    let mut renames = 0;
    loop {
        if ctx.platform.get_app(&app_name).await?.is_some() {
            return Ok(app_name);
        }
        match ctx.platform.create_app(&app_name).await {
            Ok(_) => return Ok(app_name),
            Err(ConnectorError::NameTaken(reason)) if renames < MAX_RENAMES => {
                renames += 1;
                let renamed = ctx
                    .deployments
                    .reassign_app_name(deployment.id, &project.app_name_prefix, deployment.pr_number)
                    .await?;
                tracing::warn!(from = %app_name, to = %renamed, "App name taken on platform: {}", reason);
                ctx.log_step(
                    deployment.id,
                    LogLevel::Info,
                    "rename",
                    &format!("{} taken, using {}", app_name, renamed),
                )
                .await;
                app_name = renamed;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::platform::mock::DeployGate;
    use crate::connectors::platform::MockPlatform;
    use crate::connectors::source_control::MockSourceControl;
    use crate::services::context::testing::{harness, harness_with, project, Harness};
    use crate::store::{DeploymentStore, ProjectStore};
    use std::sync::Arc;

    async fn pending(h: &Harness, project: &Project) -> Deployment {
        h.store
            .add_deployment(Deployment::new(
                project.id,
                42,
                "Add login".into(),
                "feat/login".into(),
                "0123456789abcdef".into(),
                "web-pr-42".into(),
            ))
            .await
    }

    #[tokio::test]
    async fn pending_deployment_becomes_active() {
        let h = harness();
        let project = h.store.add_project(project()).await;
        let d = pending(&h, &project).await;

        let outcome = execute(&h.ctx, d.id, &project).await.unwrap();

        assert_eq!(
            outcome,
            DeployOutcome::Ready("https://web-pr-42.preview.test".to_string())
        );
        let row = h.store.deployment(d.id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Active);
        assert_eq!(row.preview_url.as_deref(), Some("https://web-pr-42.preview.test"));
        assert!(row.completed_at.is_some());
        assert!(h.platform.has_app("web-pr-42"));

        let comments = h.scm.comments();
        assert_eq!(comments.len(), 2);
        assert!(comments[0].body.contains("build started"));
        assert!(comments[1].body.contains("https://web-pr-42.preview.test"));

        let steps: Vec<String> = h
            .store
            .logs(d.id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.step)
            .collect();
        assert_eq!(
            steps,
            vec!["building", "clone", "prepare", "app", "package", "ready"]
        );
    }

    #[tokio::test]
    async fn rerun_on_non_pending_row_has_no_side_effects() {
        let h = harness();
        let project = h.store.add_project(project()).await;
        let d = pending(&h, &project).await;
        execute(&h.ctx, d.id, &project).await.unwrap();

        let outcome = execute(&h.ctx, d.id, &project).await.unwrap();

        assert_eq!(outcome, DeployOutcome::Skipped);
        assert_eq!(h.platform.deploy_count(), 1);
        assert_eq!(h.scm.comments().len(), 2);
    }

    #[tokio::test]
    async fn failure_is_recorded_sanitized_without_secrets() {
        let h = harness_with(
            MockPlatform::new().failing_deploy(ConnectorError::Rejected(
                "release failed: DATABASE_URL=postgres://u:hunter2-db-pass@db/app\nstack trace".into(),
            )),
            MockSourceControl::new(),
        );
        let project = h.store.add_project(project()).await;
        let stored = h.ctx.cipher.encrypt("hunter2-db-pass").unwrap();
        h.store
            .upsert_env_var(project.id, "DB_PASSWORD", &stored, true, 100)
            .await
            .unwrap();
        let d = pending(&h, &project).await;

        let outcome = execute(&h.ctx, d.id, &project).await.unwrap();

        let row = h.store.deployment(d.id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Failed);
        let message = row.error_message.unwrap();
        assert!(!message.contains("hunter2-db-pass"), "{}", message);
        assert!(!message.contains("stack trace"));
        assert!(message.contains("[REDACTED]"));
        assert_eq!(outcome, DeployOutcome::Failed(message.clone()));
        assert!(row.completed_at.is_some());

        let comments = h.scm.comments();
        assert_eq!(comments.len(), 2);
        assert!(comments[1].body.contains("failed"));
        assert!(!comments[1].body.contains("hunter2-db-pass"));
    }

    #[tokio::test]
    async fn secrets_reach_platform_but_not_descriptor() {
        let h = harness();
        let project = h.store.add_project(project()).await;
        let stored = h.ctx.cipher.encrypt("sk_live_123").unwrap();
        h.store
            .upsert_env_var(project.id, "STRIPE_KEY", &stored, true, 100)
            .await
            .unwrap();
        h.store
            .upsert_env_var(project.id, "LOG_LEVEL", "debug", false, 100)
            .await
            .unwrap();
        let d = pending(&h, &project).await;

        execute(&h.ctx, d.id, &project).await.unwrap();

        let deploys = h.platform.deploys.lock().unwrap().clone();
        let (_, config) = &deploys[0];
        assert_eq!(config.secrets.get("STRIPE_KEY").map(String::as_str), Some("sk_live_123"));
        assert!(!config.descriptor.contains("sk_live_123"));
        assert!(config.descriptor.contains("LOG_LEVEL"));
    }

    #[tokio::test]
    async fn taken_platform_name_is_replaced_and_persisted() {
        let h = harness_with(
            MockPlatform::new().with_foreign_name("web-pr-42"),
            MockSourceControl::new(),
        );
        let project = h.store.add_project(project()).await;
        let d = pending(&h, &project).await;

        let outcome = execute(&h.ctx, d.id, &project).await.unwrap();

        let row = h.store.deployment(d.id).await.unwrap();
        assert_ne!(row.app_name, "web-pr-42");
        assert!(row.app_name.starts_with("web-pr-42-"));
        assert_eq!(
            outcome,
            DeployOutcome::Ready(format!("https://{}.preview.test", row.app_name))
        );
    }

    #[tokio::test]
    async fn clone_failure_marks_failed() {
        let h = harness_with(
            MockPlatform::new(),
            MockSourceControl::new()
                .failing_clone(ConnectorError::Internal("git fetch failed: not found".into())),
        );
        let project = h.store.add_project(project()).await;
        let d = pending(&h, &project).await;

        execute(&h.ctx, d.id, &project).await.unwrap();

        let row = h.store.deployment(d.id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Failed);
        assert_eq!(h.platform.deploy_count(), 0);
    }

    #[tokio::test]
    async fn row_swept_mid_deploy_gets_no_ready_comment_and_app_is_released() {
        let gate = Arc::new(DeployGate::default());
        let h = harness_with(MockPlatform::new().gated(gate.clone()), MockSourceControl::new());
        let project = h.store.add_project(project()).await;
        let id = pending(&h, &project).await.id;

        let ctx = h.ctx.clone();
        let owner = project.clone();
        let running = tokio::spawn(async move { execute(&ctx, id, &owner).await });
        gate.started.notified().await;
        h.store
            .transition(
                id,
                &[DeploymentStatus::Deploying],
                StatusChange::force_destroyed("project inactive or removed".into()),
            )
            .await
            .unwrap()
            .unwrap();
        gate.release.notify_one();

        let outcome = running.await.unwrap().unwrap();

        assert_eq!(outcome, DeployOutcome::Superseded);
        let row = h.store.deployment(id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Destroyed);
        assert!(row.preview_url.is_none());
        assert!(!h.platform.has_app("web-pr-42"));
        assert_eq!(h.platform.deletes.lock().unwrap().clone(), vec!["web-pr-42".to_string()]);
        // only the "build started" comment
        assert_eq!(h.scm.comments().len(), 1);
    }

    #[tokio::test]
    async fn transient_conflict_on_claim_is_retried() {
        let h = harness();
        let project = h.store.add_project(project()).await;
        let d = pending(&h, &project).await;
        h.store.fail_next_transitions(1);

        let outcome = execute(&h.ctx, d.id, &project).await.unwrap();

        assert!(matches!(outcome, DeployOutcome::Ready(_)));
        let row = h.store.deployment(d.id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn transient_conflict_on_final_write_still_reaches_active() {
        let gate = Arc::new(DeployGate::default());
        let h = harness_with(MockPlatform::new().gated(gate.clone()), MockSourceControl::new());
        let project = h.store.add_project(project()).await;
        let id = pending(&h, &project).await.id;

        let ctx = h.ctx.clone();
        let owner = project.clone();
        let running = tokio::spawn(async move { execute(&ctx, id, &owner).await });
        gate.started.notified().await;
        h.store.fail_next_transitions(2);
        gate.release.notify_one();

        let outcome = running.await.unwrap().unwrap();

        assert!(matches!(outcome, DeployOutcome::Ready(_)));
        let row = h.store.deployment(id).await.unwrap();
        assert_eq!(row.status, DeploymentStatus::Active);
        assert_eq!(h.scm.comments().len(), 2);
    }
}
