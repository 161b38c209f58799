use super::{App, BuildContext, ComputePlatform, DeployConfig};
use crate::configuration::PlatformSettings;
use crate::connectors::ConnectorError;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::Instrument;

/// Header naming the Dockerfile inside an uploaded build context.
pub const DOCKERFILE_HEADER: &str = "X-Dockerfile";

#[derive(Clone)]
enum RequestBody {
    Empty,
    Json(Value),
    Archive { bytes: Vec<u8>, dockerfile: String },
}

/// HTTP client for the compute platform's app API.
pub struct PlatformClient {
    base_url: String,
    http_client: reqwest::Client,
    token: String,
    organization: String,
    retry_attempts: usize,
    user_agent: String,
}

impl PlatformClient {
    pub fn new(settings: &PlatformSettings) -> Result<Self, ConnectorError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;

        Ok(Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            http_client,
            token: settings.token.clone(),
            organization: settings.organization.clone(),
            retry_attempts: settings.retry_attempts.max(1),
            user_agent: format!("previewer/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<Value, ConnectorError> {
        let mut attempt = 0usize;
        let mut last_error: Option<ConnectorError> = None;

        while attempt < self.retry_attempts {
            attempt += 1;
            let mut builder = self
                .http_client
                .request(method.clone(), format!("{}{}", self.base_url, path))
                .header("User-Agent", &self.user_agent)
                .bearer_auth(&self.token);

            builder = match body.clone() {
                RequestBody::Empty => builder,
                RequestBody::Json(value) => builder.json(&value),
                RequestBody::Archive { bytes, dockerfile } => builder
                    .header("Content-Type", "application/gzip")
                    .header(DOCKERFILE_HEADER, dockerfile)
                    .body(bytes),
            };

            let span = tracing::info_span!(
                "platform_http_request",
                path,
                attempt,
                method = %method,
            );

            match builder.send().instrument(span).await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .map_err(|err| ConnectorError::HttpError(err.to_string()))?;

                    if status.is_success() {
                        if text.trim().is_empty() {
                            return Ok(Value::Null);
                        }
                        return serde_json::from_str::<Value>(&text)
                            .map_err(|_| ConnectorError::InvalidResponse(text));
                    }

                    let error = match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            ConnectorError::Unauthorized(text)
                        }
                        StatusCode::NOT_FOUND => ConnectorError::NotFound(text),
                        StatusCode::CONFLICT => ConnectorError::NameTaken(text),
                        StatusCode::TOO_MANY_REQUESTS => ConnectorError::RateLimited(text),
                        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                            ConnectorError::Rejected(text)
                        }
                        status if status.is_server_error() => ConnectorError::ServiceUnavailable(
                            format!("Platform error {}: {}", status, text),
                        ),
                        status => {
                            ConnectorError::HttpError(format!("Platform error {}: {}", status, text))
                        }
                    };

                    if !status.is_server_error() {
                        return Err(error);
                    }
                    last_error = Some(error);
                }
                Err(err) => {
                    last_error = Some(ConnectorError::from(err));
                }
            }

            if attempt < self.retry_attempts {
                let backoff = Duration::from_millis(100 * (1_u64 << (attempt - 1)));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ConnectorError::ServiceUnavailable("Platform request failed".to_string())
        }))
    }

    fn parse_app(payload: Value, fallback_name: &str) -> Result<App, ConnectorError> {
        let payload = payload.get("app").cloned().unwrap_or(payload);
        if payload.is_null() {
            return Ok(App {
                name: fallback_name.to_string(),
                hostname: None,
                status: None,
            });
        }
        serde_json::from_value::<App>(payload.clone())
            .map_err(|_| ConnectorError::InvalidResponse(payload.to_string()))
    }
}

#[async_trait]
impl ComputePlatform for PlatformClient {
    #[tracing::instrument(name = "Platform create app", skip(self))]
    async fn create_app(&self, name: &str) -> Result<App, ConnectorError> {
        let body = json!({ "app_name": name, "org_slug": self.organization });
        let payload = self
            .send_request(Method::POST, "/v1/apps", RequestBody::Json(body))
            .await
            .map_err(|err| match err {
                // Some platform versions answer 422 for a duplicate name
                ConnectorError::Rejected(msg) if msg.contains("taken") => {
                    ConnectorError::NameTaken(msg)
                }
                other => other,
            })?;
        Self::parse_app(payload, name)
    }

    #[tracing::instrument(name = "Platform get app", skip(self))]
    async fn get_app(&self, name: &str) -> Result<Option<App>, ConnectorError> {
        match self
            .send_request(Method::GET, &format!("/v1/apps/{}", name), RequestBody::Empty)
            .await
        {
            Ok(payload) => Self::parse_app(payload, name).map(Some),
            Err(ConnectorError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(name = "Platform delete app", skip(self))]
    async fn delete_app(&self, name: &str) -> Result<(), ConnectorError> {
        match self
            .send_request(Method::DELETE, &format!("/v1/apps/{}", name), RequestBody::Empty)
            .await
        {
            Ok(_) | Err(ConnectorError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(name = "Platform deploy", skip(self, build_context, config))]
    async fn deploy(
        &self,
        app_name: &str,
        build_context: BuildContext,
        config: &DeployConfig,
    ) -> Result<String, ConnectorError> {
        let build = self
            .send_request(
                Method::POST,
                &format!("/v1/apps/{}/builds", app_name),
                RequestBody::Archive {
                    bytes: build_context.archive,
                    dockerfile: build_context.dockerfile,
                },
            )
            .await?;
        let build_id = build
            .get("id")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
            .ok_or_else(|| ConnectorError::InvalidResponse(build.to_string()))?;
        tracing::info!(app_name, build_id = %build_id, "Build accepted");

        let release = json!({
            "build_id": build_id,
            "config": config.descriptor,
            "region": config.region,
            "internal_port": config.internal_port,
            "env": config.env,
            "secrets": config.secrets,
        });
        let payload = self
            .send_request(
                Method::POST,
                &format!("/v1/apps/{}/releases", app_name),
                RequestBody::Json(release),
            )
            .await?;

        let hostname = payload
            .get("hostname")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectorError::InvalidResponse(payload.to_string()))?;

        if hostname.starts_with("http://") || hostname.starts_with("https://") {
            Ok(hostname.to_string())
        } else {
            Ok(format!("https://{}", hostname))
        }
    }
}
