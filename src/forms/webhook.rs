//! Typed view of the source-control webhook bodies we act on.
//!
//! Only the fields the orchestrator reads are modelled; everything else in
//! the delivery is ignored by serde.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub full_name: String,
    pub name: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Head {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub title: String,
    pub head: Head,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: i64,
}

/// `X-Event-Type: pull_request`
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: i32,
    pub pull_request: PullRequest,
    pub repository: Repository,
    #[serde(default)]
    pub installation: Option<Installation>,
}

/// `X-Event-Type: repository`
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryEvent {
    pub action: String,
    pub repository: Repository,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_request_event_reads_nested_fields() {
        let body = r#"{
            "action": "opened",
            "number": 42,
            "pull_request": {"title": "Add thing", "head": {"ref": "feature", "sha": "abc1234"}, "extra": 1},
            "repository": {"id": 7, "full_name": "owner/repo", "name": "repo", "owner": {"login": "owner"}}
        }"#;
        let event: PullRequestEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.number, 42);
        assert_eq!(event.pull_request.head.git_ref, "feature");
        assert_eq!(event.repository.owner.login, "owner");
        assert!(event.installation.is_none());
    }

    #[test]
    fn missing_head_is_rejected() {
        let body = r#"{"action": "opened", "number": 1, "pull_request": {"title": "x"},
            "repository": {"id": 7, "full_name": "o/r", "name": "r", "owner": {"login": "o"}}}"#;
        assert!(serde_json::from_str::<PullRequestEvent>(body).is_err());
    }
}
