//! Source control connector: installation tokens, shallow checkouts and PR
//! comments.

use crate::connectors::ConnectorError;
use async_trait::async_trait;
use std::path::Path;

pub mod client;
#[cfg(test)]
pub mod mock;

pub use client::GithubClient;
#[cfg(test)]
pub use mock::MockSourceControl;

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Short-lived token for the repository's installation, or the configured
    /// static token when the delivery has no installation.
    async fn installation_token(&self, installation_id: Option<i64>)
        -> Result<String, ConnectorError>;

    /// Check out exactly `commit_sha` of `repository` (owner/name) into `dest`.
    async fn clone_at(
        &self,
        repository: &str,
        token: &str,
        commit_sha: &str,
        dest: &Path,
    ) -> Result<(), ConnectorError>;

    /// Comment on a pull request as the installation (or static identity).
    async fn post_comment(
        &self,
        installation_id: Option<i64>,
        owner: &str,
        repo: &str,
        pr_number: i32,
        body: &str,
    ) -> Result<(), ConnectorError>;
}
