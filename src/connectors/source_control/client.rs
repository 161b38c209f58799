use super::SourceControl;
use crate::configuration::SourceControlSettings;
use crate::connectors::ConnectorError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

struct GithubApp {
    app_id: String,
    key: EncodingKey,
}

pub struct GithubClient {
    api_url: String,
    clone_base_url: String,
    http_client: reqwest::Client,
    static_token: String,
    app: Option<GithubApp>,
    tokens: Mutex<HashMap<i64, AccessToken>>,
    user_agent: String,
}

impl GithubClient {
    pub fn new(settings: &SourceControlSettings) -> Result<Self, ConnectorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;

        let app = match (&settings.app_id, &settings.private_key) {
            (Some(app_id), Some(pem)) if !app_id.is_empty() && !pem.is_empty() => {
                let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|err| {
                    ConnectorError::Internal(format!("Invalid GitHub App private key: {}", err))
                })?;
                Some(GithubApp {
                    app_id: app_id.clone(),
                    key,
                })
            }
            _ => None,
        };

        Ok(Self {
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            clone_base_url: settings.clone_base_url.trim_end_matches('/').to_string(),
            http_client,
            static_token: settings.token.clone(),
            app,
            tokens: Mutex::new(HashMap::new()),
            user_agent: format!("previewer/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    fn app_jwt(app: &GithubApp) -> Result<String, ConnectorError> {
        let now = Utc::now().timestamp();
        // iat backdated for clock drift; GitHub caps exp at 10 minutes
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: app.app_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &app.key)
            .map_err(|err| ConnectorError::Internal(format!("App JWT signing failed: {}", err)))
    }

    fn map_status(status: StatusCode, text: String) -> ConnectorError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::Unauthorized(text),
            StatusCode::NOT_FOUND => ConnectorError::NotFound(text),
            StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited(text),
            status if status.is_server_error() => {
                ConnectorError::ServiceUnavailable(format!("GitHub error {}: {}", status, text))
            }
            status => ConnectorError::HttpError(format!("GitHub error {}: {}", status, text)),
        }
    }

    fn auth_header(token: &str) -> String {
        let basic = general_purpose::STANDARD.encode(format!("x-access-token:{}", token));
        format!("Authorization: Basic {}", basic)
    }

    async fn git(&self, args: &[&str], dest: &Path, token: &str) -> Result<(), ConnectorError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        // The header goes through the environment so it never shows up in argv
        if !token.is_empty() {
            command
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", Self::auth_header(token));
        }

        let output = command
            .output()
            .await
            .map_err(|err| ConnectorError::Internal(format!("failed to run git: {}", err)))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = format!("git {} failed: {}", args[0], stderr.trim());
        if stderr.contains("Could not resolve host") || stderr.contains("timed out") {
            Err(ConnectorError::ServiceUnavailable(message))
        } else {
            Err(ConnectorError::Internal(message))
        }
    }
}

#[async_trait]
impl SourceControl for GithubClient {
    #[tracing::instrument(name = "Installation token", skip(self))]
    async fn installation_token(
        &self,
        installation_id: Option<i64>,
    ) -> Result<String, ConnectorError> {
        let (app, installation_id) = match (&self.app, installation_id) {
            (Some(app), Some(id)) => (app, id),
            _ => return Ok(self.static_token.clone()),
        };

        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(&installation_id) {
            if cached.expires_at - ChronoDuration::minutes(5) > Utc::now() {
                return Ok(cached.token.clone());
            }
        }

        let jwt = Self::app_jwt(app)?;
        let resp = self
            .http_client
            .post(format!(
                "{}/app/installations/{}/access_tokens",
                self.api_url, installation_id
            ))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(jwt)
            .send()
            .await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| ConnectorError::HttpError(err.to_string()))?;
        if !status.is_success() {
            return Err(Self::map_status(status, text));
        }

        let token: AccessToken =
            serde_json::from_str(&text).map_err(|_| ConnectorError::InvalidResponse(text))?;
        let value = token.token.clone();
        tokens.insert(installation_id, token);
        Ok(value)
    }

    #[tracing::instrument(name = "Clone repository", skip(self, token, dest))]
    async fn clone_at(
        &self,
        repository: &str,
        token: &str,
        commit_sha: &str,
        dest: &Path,
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/{}.git", self.clone_base_url, repository);
        self.git(&["init", "--quiet"], dest, token).await?;
        self.git(
            &["fetch", "--quiet", "--depth", "1", &url, commit_sha],
            dest,
            token,
        )
        .await?;
        self.git(
            &["checkout", "--quiet", "--detach", "FETCH_HEAD"],
            dest,
            token,
        )
        .await?;
        tracing::info!(repository, commit_sha, "Checked out commit");
        Ok(())
    }

    #[tracing::instrument(name = "Post PR comment", skip(self, body))]
    async fn post_comment(
        &self,
        installation_id: Option<i64>,
        owner: &str,
        repo: &str,
        pr_number: i32,
        body: &str,
    ) -> Result<(), ConnectorError> {
        let token = self.installation_token(installation_id).await?;
        let mut builder = self
            .http_client
            .post(format!(
                "{}/repos/{}/{}/issues/{}/comments",
                self.api_url, owner, repo, pr_number
            ))
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "body": body }));
        if !token.is_empty() {
            builder = builder.bearer_auth(&token);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Self::map_status(status, text))
    }
}
