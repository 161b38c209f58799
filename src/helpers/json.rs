use actix_web::error::{Error, InternalError};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use std::marker::PhantomData;

#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<T>,
}

pub struct JsonResponseBuilder<T> {
    item: PhantomData<T>,
}

impl<T> JsonResponse<T>
where
    T: Serialize,
{
    pub fn build() -> JsonResponseBuilder<T> {
        JsonResponseBuilder { item: PhantomData }
    }
}

impl<T> JsonResponseBuilder<T>
where
    T: Serialize,
{
    fn into_body(self, status: &str, message: String) -> JsonResponse<T> {
        JsonResponse {
            status: status.to_string(),
            message,
            id: None,
            item: None,
        }
    }

    pub fn ok<M: Into<String>>(self, message: M) -> web::Json<JsonResponse<T>> {
        let msg = message.into();
        let msg = if msg.trim().is_empty() {
            String::from("Success")
        } else {
            msg
        };
        web::Json(self.into_body("OK", msg))
    }

    pub fn service_unavailable<M: Into<String>>(self, message: M) -> Error {
        let body = self.into_body("Error", message.into());
        let response = HttpResponse::build(StatusCode::SERVICE_UNAVAILABLE).json(&body);
        InternalError::from_response(body.message.clone(), response).into()
    }
}
