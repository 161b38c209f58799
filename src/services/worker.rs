//! Job queue and the per-job pipeline: resolve → reconcile → execute.
//!
//! Ingress only enqueues. A fixed pool of workers drains one shared tokio
//! channel; jobs that fail transiently go back on the queue after a delay.

use crate::helpers::retry::backoff_delay;
use crate::models::Project;
use crate::services::context::AppContext;
use crate::services::deployer::{self, DeployOutcome};
use crate::services::errors::DeployError;
use crate::services::ingress::{Intent, PullRequestRef, RepositoryChange};
use crate::services::reconciler::{self, PrAction, ReconcileRequest};
use crate::services::resolver;
use crate::services::teardown;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

const REQUEUE_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    PullRequest {
        pull_request: PullRequestRef,
        action: PrAction,
    },
    Repository {
        repository_id: i64,
        change: RepositoryChange,
    },
}

impl Job {
    /// `None` for intents that need no work.
    pub fn from_intent(intent: Intent) -> Option<Self> {
        match intent {
            Intent::PullRequest {
                pull_request,
                action,
            } => Some(Job::PullRequest {
                pull_request,
                action,
            }),
            Intent::Repository {
                repository_id,
                change,
            } => Some(Job::Repository {
                repository_id,
                change,
            }),
            Intent::Ignore(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QueuedJob {
    job: Job,
    attempt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// Producer side handed to the HTTP layer.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
}

impl JobQueue {
    /// Never waits: a full queue is reported so ingress can answer quickly.
    pub fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.sender
            .try_send(QueuedJob { job, attempt: 1 })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            })
    }
}

#[cfg(test)]
impl JobQueue {
    /// A queue nobody drains; the receiver lets a test empty it by hand.
    pub(crate) fn unattended(capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (JobQueue { sender }, receiver)
    }
}

pub fn spawn_workers(ctx: AppContext) -> (JobQueue, Vec<JoinHandle<()>>) {
    let (sender, receiver) = mpsc::channel(ctx.worker.queue_capacity.max(1));
    let receiver = Arc::new(Mutex::new(receiver));
    let handles = (0..ctx.worker.concurrency.max(1))
        .map(|n| {
            tokio::spawn(worker_loop(
                n,
                ctx.clone(),
                receiver.clone(),
                sender.downgrade(),
            ))
        })
        .collect();
    (JobQueue { sender }, handles)
}

async fn worker_loop(
    n: usize,
    ctx: AppContext,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    requeue: mpsc::WeakSender<QueuedJob>,
) {
    tracing::info!(worker = n, "Worker started");
    loop {
        let next = { receiver.lock().await.recv().await };
        let Some(queued) = next else { break };

        let span = tracing::info_span!("job", worker = n, attempt = queued.attempt);
        match process(&ctx, &queued.job).instrument(span).await {
            Ok(()) => {}
            Err(err) if err.is_retryable() && queued.attempt < ctx.worker.max_job_attempts => {
                let delay = backoff_delay(queued.attempt, REQUEUE_BASE);
                tracing::warn!(worker = n, ?delay, job = ?queued.job, "Transient failure, requeueing: {}", err);
                if let Some(sender) = requeue.upgrade() {
                    let retry = QueuedJob {
                        job: queued.job,
                        attempt: queued.attempt + 1,
                    };
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if sender.send(retry).await.is_err() {
                            tracing::warn!("Queue closed, retry dropped");
                        }
                    });
                }
            }
            Err(err) => {
                tracing::error!(worker = n, job = ?queued.job, "Job failed: {}", err);
            }
        }
    }
    tracing::info!(worker = n, "Worker stopped");
}

/// Run one job to completion.
pub async fn process(ctx: &AppContext, job: &Job) -> Result<(), DeployError> {
    match job {
        Job::PullRequest {
            pull_request,
            action,
        } => {
            let project =
                match resolver::resolve(ctx.projects.as_ref(), pull_request.repository_id).await? {
                    Some(project) => project,
                    None => return Ok(()),
                };
            handle_pull_request(ctx, &project, pull_request.pr_number, action.clone()).await
        }
        Job::Repository {
            repository_id,
            change,
        } => handle_repository(ctx, *repository_id, change).await,
    }
}

#[tracing::instrument(name = "Handle pull request", skip(ctx, project, action), fields(project_id = project.id))]
async fn handle_pull_request(
    ctx: &AppContext,
    project: &Project,
    pr_number: i32,
    action: PrAction,
) -> Result<(), DeployError> {
    let request = ReconcileRequest {
        project_id: project.id,
        pr_number,
        app_name_prefix: project.app_name_prefix.clone(),
        action,
    };
    let reconciled =
        reconciler::reconcile(ctx.deployments.as_ref(), &request, &ctx.reconcile).await?;
    let deployment = match reconciled.deployment.clone() {
        Some(deployment) => deployment,
        None => return Ok(()),
    };

    if reconciled.needs_deploy() {
        let outcome = deployer::execute(ctx, deployment.id, project).await?;
        if matches!(outcome, DeployOutcome::Skipped | DeployOutcome::Superseded) {
            return Ok(());
        }
        finish_deferred_teardown(ctx, project, request, deployment.id).await?;
    } else if reconciled.needs_teardown() {
        run_teardown(ctx, deployment.id, Some(project)).await;
    }
    Ok(())
}

/// A close that arrived while the row was building only set a flag; now that
/// the deploy wrote a terminal status, act on it.
async fn finish_deferred_teardown(
    ctx: &AppContext,
    project: &Project,
    request: ReconcileRequest,
    deployment_id: i32,
) -> Result<(), DeployError> {
    let requested = ctx
        .deployments
        .fetch(deployment_id)
        .await?
        .map(|row| row.teardown_requested())
        .unwrap_or(false);
    if !requested {
        return Ok(());
    }

    tracing::info!(deployment_id, "Running deferred teardown");
    let request = ReconcileRequest {
        action: PrAction::Teardown,
        ..request
    };
    let reconciled =
        reconciler::reconcile(ctx.deployments.as_ref(), &request, &ctx.reconcile).await?;
    if let (true, Some(row)) = (reconciled.needs_teardown(), reconciled.deployment) {
        run_teardown(ctx, row.id, Some(project)).await;
    }
    Ok(())
}

/// Teardown failures are left to the sweep, which retries `destroying` rows.
async fn run_teardown(ctx: &AppContext, deployment_id: i32, project: Option<&Project>) {
    if let Err(err) = teardown::execute(ctx, deployment_id, project).await {
        tracing::warn!(deployment_id, "Teardown incomplete, left for sweep: {}", err);
    }
}

#[tracing::instrument(name = "Handle repository change", skip(ctx))]
async fn handle_repository(
    ctx: &AppContext,
    repository_id: i64,
    change: &RepositoryChange,
) -> Result<(), DeployError> {
    let project = match resolver::resolve(ctx.projects.as_ref(), repository_id).await? {
        Some(project) => project,
        None => return Ok(()),
    };

    match change {
        RepositoryChange::Rename {
            owner,
            name,
            full_name,
        } => {
            ctx.projects
                .update_repository(project.id, owner, name, full_name)
                .await?;
            tracing::info!(project_id = project.id, full_name = %full_name, "Repository renamed");
        }
        RepositoryChange::Deactivate => {
            ctx.projects.deactivate_project(project.id).await?;
            let live = ctx.deployments.live_for_project(project.id).await?;
            tracing::info!(project_id = project.id, live = live.len(), "Project deactivated");
            for deployment in live {
                handle_pull_request(ctx, &project, deployment.pr_number, PrAction::Teardown)
                    .await?;
            }
        }
    }
    Ok(())
}
