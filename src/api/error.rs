//! Maps `ServiceError` to the three generic JSON error bodies the read API
//! is allowed to return. Never echoes the underlying `Display`.

use crate::error::ServiceError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.0 {
            ServiceError::TransientNetwork(_) => (StatusCode::SERVICE_UNAVAILABLE, "network"),
            ServiceError::StoreWriteFailed | ServiceError::StoreReadFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database")
            }
            ServiceError::MalformedInput(_) => (StatusCode::BAD_REQUEST, "io"),
            ServiceError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "network"),
            ServiceError::Cancelled | ServiceError::ConfigInvalid => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database")
            }
        };
        (status, Json(serde_json::json!({ "error": kind }))).into_response()
    }
}

pub fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": "io", "message": message })),
    )
        .into_response()
}

pub fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not_found" })),
    )
        .into_response()
}
