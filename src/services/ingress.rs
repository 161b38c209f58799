//! Event ingress: turns a raw webhook delivery into an [`Intent`] or a
//! rejection. Never touches deployment rows.

use crate::configuration::WebhookSettings;
use crate::forms::{PullRequestEvent, RepositoryEvent};
use crate::helpers::sanitize::sanitize_text;
use crate::services::delivery_store::DeliveryStore;
use crate::services::reconciler::PrAction;
use hmac::{Hmac, Mac};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
const SIGNATURE_PREFIX: &str = "sha256=";

lazy_static! {
    static ref COMMIT_SHA: Regex = Regex::new(r"^[0-9a-fA-F]{7,64}$").unwrap();
}

#[derive(Debug, Error, PartialEq)]
pub enum IngressError {
    #[error("webhook secret is not configured")]
    Misconfigured,
    #[error("malformed delivery: {0}")]
    Malformed(String),
    #[error("too many deliveries from this source")]
    RateLimited,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("delivery {0} was already processed")]
    Replay(String),
    #[error("delivery state unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pub signature: Option<String>,
    pub event_type: Option<String>,
    pub delivery_id: Option<String>,
}

impl WebhookHeaders {
    pub fn delivery_id(&self) -> Option<&str> {
        self.delivery_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Identity of the pull request an event refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequestRef {
    pub repository_id: i64,
    pub installation_id: Option<i64>,
    pub pr_number: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryChange {
    /// Archived or deleted: stop previewing it.
    Deactivate,
    /// Renamed or transferred.
    Rename {
        owner: String,
        name: String,
        full_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    PullRequest {
        pull_request: PullRequestRef,
        action: PrAction,
    },
    Repository {
        repository_id: i64,
        change: RepositoryChange,
    },
    Ignore(String),
}

pub struct Ingress {
    settings: WebhookSettings,
    deliveries: Arc<dyn DeliveryStore>,
}

impl Ingress {
    pub fn new(settings: WebhookSettings, deliveries: Arc<dyn DeliveryStore>) -> Self {
        Self {
            settings,
            deliveries,
        }
    }

    #[tracing::instrument(
        name = "Ingest webhook",
        skip(self, body, headers),
        fields(delivery_id = ?headers.delivery_id, event = ?headers.event_type)
    )]
    pub async fn ingest(
        &self,
        body: &[u8],
        headers: &WebhookHeaders,
        source_ip: &str,
    ) -> Result<Intent, IngressError> {
        if self.settings.secret.is_empty() {
            tracing::error!("Webhook secret is empty, refusing delivery");
            return Err(IngressError::Misconfigured);
        }
        if body.len() > self.settings.max_payload_bytes {
            return Err(IngressError::Malformed(format!(
                "payload of {} bytes exceeds {}",
                body.len(),
                self.settings.max_payload_bytes
            )));
        }

        let allowed = self
            .deliveries
            .allow(
                source_ip,
                self.settings.rate_limit_per_window,
                self.settings.rate_limit_window(),
            )
            .await
            .map_err(|err| IngressError::Unavailable(err.to_string()))?;
        if !allowed {
            tracing::warn!(source_ip, "Rate limit exceeded");
            return Err(IngressError::RateLimited);
        }

        verify_signature(self.settings.secret.as_bytes(), body, headers.signature.as_deref())?;

        let delivery_id = headers
            .delivery_id()
            .ok_or_else(|| IngressError::Malformed(format!("{} header missing", DELIVERY_ID_HEADER)))?;
        let first = self
            .deliveries
            .first_delivery(delivery_id, self.settings.replay_ttl())
            .await
            .map_err(|err| IngressError::Unavailable(err.to_string()))?;
        if !first {
            tracing::info!(delivery_id, "Duplicate delivery");
            return Err(IngressError::Replay(delivery_id.to_string()));
        }

        match headers.event_type.as_deref().unwrap_or_default() {
            "ping" => Ok(Intent::Ignore("ping".to_string())),
            "pull_request" => classify_pull_request(parse(body)?),
            "repository" => Ok(classify_repository(parse(body)?)),
            other => Ok(Intent::Ignore(format!("unhandled event type '{}'", other))),
        }
    }
}

impl Ingress {
    /// Undoes the replay record of a delivery whose work could not be queued,
    /// so the sender's retry is not answered as a duplicate.
    pub async fn release(&self, delivery_id: &str) {
        if let Err(err) = self.deliveries.forget(delivery_id).await {
            tracing::error!(delivery_id, "Could not release delivery: {}", err);
        }
    }
}

/// Constant-time check of `sha256=<hex>` against HMAC-SHA256(secret, body).
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), IngressError> {
    let signature = signature
        .and_then(|s| s.trim().strip_prefix(SIGNATURE_PREFIX))
        .ok_or(IngressError::InvalidSignature)?;
    let expected = hex::decode(signature).map_err(|_| IngressError::InvalidSignature)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|err| {
        tracing::error!("error generating hmac {err:?}");
        IngressError::Misconfigured
    })?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| IngressError::InvalidSignature)
}

/// Header value a sender would put in [`SIGNATURE_HEADER`] for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, IngressError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|_| IngressError::Misconfigured)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, IngressError> {
    serde_json::from_slice(body).map_err(|err| IngressError::Malformed(err.to_string()))
}

fn classify_pull_request(event: PullRequestEvent) -> Result<Intent, IngressError> {
    let pull_request = PullRequestRef {
        repository_id: event.repository.id,
        installation_id: event.installation.map(|i| i.id),
        pr_number: event.number,
    };

    let action = match event.action.as_str() {
        "opened" | "synchronize" | "reopened" => {
            let sha = event.pull_request.head.sha.trim();
            if !COMMIT_SHA.is_match(sha) {
                return Err(IngressError::Malformed("head sha is not a commit id".to_string()));
            }
            PrAction::CreateOrUpdate {
                commit_sha: sha.to_string(),
                branch: sanitize_text(&event.pull_request.head.git_ref),
                title: sanitize_text(&event.pull_request.title),
            }
        }
        "closed" => PrAction::Teardown,
        other => return Ok(Intent::Ignore(format!("pull_request action '{}'", other))),
    };

    Ok(Intent::PullRequest {
        pull_request,
        action,
    })
}

fn classify_repository(event: RepositoryEvent) -> Intent {
    let change = match event.action.as_str() {
        "archived" | "deleted" => RepositoryChange::Deactivate,
        "renamed" | "transferred" => RepositoryChange::Rename {
            owner: event.repository.owner.login,
            name: event.repository.name,
            full_name: event.repository.full_name,
        },
        other => return Intent::Ignore(format!("repository action '{}'", other)),
    };
    Intent::Repository {
        repository_id: event.repository.id,
        change,
    }
}
