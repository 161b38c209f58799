use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a single preview deployment row.
///
/// `Active` is the "ready" state of the state machine; it is persisted as
/// `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Active,
    Failed,
    Destroying,
    Destroyed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Destroying => "destroying",
            DeploymentStatus::Destroyed => "destroyed",
        }
    }

    /// A create-path operation is running for this row.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Pending | DeploymentStatus::Building | DeploymentStatus::Deploying
        )
    }

    /// The row is on its way out, or already gone.
    pub fn is_teardown(&self) -> bool {
        matches!(self, DeploymentStatus::Destroying | DeploymentStatus::Destroyed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DeploymentStatus::Pending),
            "building" => Ok(DeploymentStatus::Building),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "active" => Ok(DeploymentStatus::Active),
            "failed" => Ok(DeploymentStatus::Failed),
            "destroying" => Ok(DeploymentStatus::Destroying),
            "destroyed" => Ok(DeploymentStatus::Destroyed),
            other => Err(format!("unknown deployment status: {}", other)),
        }
    }
}

impl TryFrom<String> for DeploymentStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// One attempt to run a PR's code on the compute platform
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Deployment {
    pub id: i32,
    pub project_id: i32,
    pub pr_number: i32,
    pub pr_title: String,
    pub branch: String,
    pub commit_sha: String,
    pub app_name: String, // globally unique among non-destroyed rows
    pub preview_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: DeploymentStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata flag set when a close event arrives while a build is running.
pub const TEARDOWN_REQUESTED: &str = "teardown_requested";

impl Deployment {
    pub fn new(
        project_id: i32,
        pr_number: i32,
        pr_title: String,
        branch: String,
        commit_sha: String,
        app_name: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            project_id,
            pr_number,
            pr_title,
            branch,
            commit_sha,
            app_name,
            preview_url: None,
            status: DeploymentStatus::Pending,
            error_message: None,
            started_at: Some(now),
            completed_at: None,
            destroyed_at: None,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Point in time the cooldown window is measured from.
    pub fn cooldown_anchor(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    pub fn teardown_requested(&self) -> bool {
        self.metadata
            .get(TEARDOWN_REQUESTED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
