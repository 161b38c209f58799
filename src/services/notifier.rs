use crate::configuration::NotifierSettings;
use crate::connectors::SourceControl;
use crate::helpers::retry::retry;
use crate::models::Project;
use std::sync::Arc;
use std::time::Duration;

/// Where a PR comment goes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentTarget {
    pub installation_id: Option<i64>,
    pub owner: String,
    pub repo: String,
    pub pr_number: i32,
}

impl CommentTarget {
    pub fn for_project(project: &Project, pr_number: i32) -> Self {
        Self {
            installation_id: project.installation_id,
            owner: project.repository_owner.clone(),
            repo: project.repository_name.clone(),
            pr_number,
        }
    }
}

/// Best-effort PR comments. Failures are logged and swallowed; nothing that
/// happens here changes a deployment's state.
#[derive(Clone)]
pub struct Notifier {
    source_control: Arc<dyn SourceControl>,
    attempts: u32,
    backoff: Duration,
}

impl Notifier {
    pub fn new(source_control: Arc<dyn SourceControl>, settings: &NotifierSettings) -> Self {
        Self {
            source_control,
            attempts: settings.attempts.max(1),
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }

    #[tracing::instrument(name = "Notify PR", skip(self, message), fields(repo = %target.repo, pr_number = target.pr_number))]
    pub async fn post(&self, target: &CommentTarget, message: &str) {
        let result = retry(
            self.attempts,
            self.backoff,
            |_| true,
            || {
                self.source_control.post_comment(
                    target.installation_id,
                    &target.owner,
                    &target.repo,
                    target.pr_number,
                    message,
                )
            },
        )
        .await;

        if let Err(err) = result {
            tracing::warn!("PR comment dropped: {}", err);
        }
    }
}

pub fn building_message(app_name: &str, commit_sha: &str) -> String {
    format!(
        "🔨 **Preview build started** for `{}`\n\nApp: `{}`",
        short_sha(commit_sha),
        app_name
    )
}

pub fn ready_message(preview_url: &str, commit_sha: &str) -> String {
    format!(
        "🚀 **Preview ready**\n\n{}\n\nDeployed commit `{}`.",
        preview_url,
        short_sha(commit_sha)
    )
}

pub fn failed_message(error: &str, commit_sha: &str) -> String {
    format!(
        "❌ **Preview deployment failed** for `{}`\n\n```\n{}\n```",
        short_sha(commit_sha),
        error
    )
}

pub fn destroyed_message(app_name: &str) -> String {
    format!("🧹 Preview `{}` has been removed.", app_name)
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
