use super::SourceControl;
use crate::connectors::ConnectorError;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct PostedComment {
    pub repository: String,
    pub pr_number: i32,
    pub body: String,
}

/// Fake repository host. Checkouts produce a minimal Node project unless
/// `files` says otherwise.
pub struct MockSourceControl {
    pub files: Mutex<Vec<(String, String)>>,
    pub comments: Mutex<Vec<PostedComment>>,
    pub clones: Mutex<Vec<String>>,
    pub fail_clone: Mutex<Option<ConnectorError>>,
    /// Number of upcoming comment calls that fail
    pub failing_comments: Mutex<u32>,
}

impl Default for MockSourceControl {
    fn default() -> Self {
        Self {
            files: Mutex::new(vec![(
                "package.json".to_string(),
                r#"{"name":"web","scripts":{"start":"node index.js"}}"#.to_string(),
            )]),
            comments: Mutex::new(vec![]),
            clones: Mutex::new(vec![]),
            fail_clone: Mutex::new(None),
            failing_comments: Mutex::new(0),
        }
    }
}

impl MockSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(self, files: &[(&str, &str)]) -> Self {
        *self.files.lock().unwrap() = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        self
    }

    pub fn failing_clone(self, err: ConnectorError) -> Self {
        *self.fail_clone.lock().unwrap() = Some(err);
        self
    }

    pub fn failing_comments(self, count: u32) -> Self {
        *self.failing_comments.lock().unwrap() = count;
        self
    }

    pub fn comments(&self) -> Vec<PostedComment> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SourceControl for MockSourceControl {
    async fn installation_token(
        &self,
        installation_id: Option<i64>,
    ) -> Result<String, ConnectorError> {
        Ok(format!("token-{}", installation_id.unwrap_or_default()))
    }

    async fn clone_at(
        &self,
        repository: &str,
        _token: &str,
        commit_sha: &str,
        dest: &Path,
    ) -> Result<(), ConnectorError> {
        if let Some(err) = self.fail_clone.lock().unwrap().clone() {
            return Err(err);
        }
        let files = self.files.lock().unwrap().clone();
        for (relative, content) in files {
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| ConnectorError::Internal(err.to_string()))?;
            }
            std::fs::write(target, content)
                .map_err(|err| ConnectorError::Internal(err.to_string()))?;
        }
        self.clones
            .lock()
            .unwrap()
            .push(format!("{}@{}", repository, commit_sha));
        Ok(())
    }

    async fn post_comment(
        &self,
        _installation_id: Option<i64>,
        owner: &str,
        repo: &str,
        pr_number: i32,
        body: &str,
    ) -> Result<(), ConnectorError> {
        {
            let mut failing = self.failing_comments.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ConnectorError::ServiceUnavailable("comment api down".into()));
            }
        }
        self.comments.lock().unwrap().push(PostedComment {
            repository: format!("{}/{}", owner, repo),
            pr_number,
            body: body.to_string(),
        });
        Ok(())
    }
}
