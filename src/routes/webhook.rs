use crate::helpers::JsonResponse;
use crate::services::ingress::{
    Ingress, IngressError, Intent, WebhookHeaders, DELIVERY_ID_HEADER, EVENT_TYPE_HEADER,
    SIGNATURE_HEADER,
};
use crate::services::worker::{Job, JobQueue};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, ResponseError, Result};
use serde_json::json;

impl ResponseError for IngressError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Replay(_) => StatusCode::OK,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // internal detail stays in the logs
        let message = match self {
            Self::Unavailable(_) => "Delivery state unavailable".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(JsonResponse::<serde_json::Value> {
            status: "Error".to_string(),
            message,
            id: None,
            item: None,
        })
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

#[tracing::instrument(name = "Receive webhook", skip(req, body, ingress, queue))]
#[post("")]
pub async fn receive_handler(
    req: HttpRequest,
    body: web::Bytes,
    ingress: web::Data<Ingress>,
    queue: web::Data<JobQueue>,
) -> Result<impl Responder> {
    let headers = WebhookHeaders {
        signature: header(&req, SIGNATURE_HEADER),
        event_type: header(&req, EVENT_TYPE_HEADER),
        delivery_id: header(&req, DELIVERY_ID_HEADER),
    };
    // forwarded headers are client controlled, the socket address is not
    let source_ip = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let intent = match ingress.ingest(&body, &headers, &source_ip).await {
        Ok(intent) => intent,
        Err(IngressError::Replay(_)) => {
            return Ok(JsonResponse::<serde_json::Value>::build().ok("duplicate"));
        }
        Err(err) => {
            tracing::warn!("Webhook rejected: {}", err);
            return Err(err.into());
        }
    };

    if let Intent::Ignore(reason) = &intent {
        tracing::info!(reason = %reason, "Webhook ignored");
        return Ok(JsonResponse::<serde_json::Value>::build().ok("ignored"));
    }

    if let Some(job) = Job::from_intent(intent) {
        if let Err(err) = queue.enqueue(job) {
            tracing::error!("Could not enqueue job: {}", err);
            if let Some(delivery_id) = headers.delivery_id() {
                ingress.release(delivery_id).await;
            }
            return Err(JsonResponse::<serde_json::Value>::build().service_unavailable(err.to_string()));
        }
    }
    Ok(JsonResponse::<serde_json::Value>::build().ok("accepted"))
}

#[get("")]
pub async fn status_handler() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
