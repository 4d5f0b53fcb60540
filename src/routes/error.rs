use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::queue::SubmitError;
use crate::services::registry::RegistryError;

/// Errors surfaced to HTTP callers as `{error, detail}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    UnsupportedMedia(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::QueueFull { .. } => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::UnsupportedMedia(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let mut response = (status, Json(json!({ "error": code, "detail": self.to_string() })))
            .into_response();
        if matches!(self, ApiError::QueueFull { .. }) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, axum::http::HeaderValue::from_static("5"));
        }
        response
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::QueueFull { capacity } => ApiError::QueueFull { capacity },
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
