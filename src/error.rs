//! HTTP-presentation error: wraps the shared [`ca_domain::error::Error`]
//! taxonomy at the web boundary, mapping each category onto a status code
//! per the propagation policy and carrying the plain-English message plus
//! any recovery hint in the JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ca_domain::error::{Category, Error as CoreError};
use serde_json::json;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match err.category() {
            Category::Cancellation => StatusCode::from_u16(499).unwrap(),
            Category::ValidationError => StatusCode::BAD_REQUEST,
            Category::BackendUnavailable | Category::BackendNotFound => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Category::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Category::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Category::ApiError if err.is_critical() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({
            "error": err.to_string(),
            "category": err.category(),
            "recovery_hint": err.recovery_hint(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_maps_to_499() {
        let resp = ApiError(CoreError::Cancellation).into_response();
        assert_eq!(resp.status().as_u16(), 499);
    }

    #[test]
    fn validation_maps_to_400() {
        let resp = ApiError(CoreError::Validation("bad".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn backend_unavailable_maps_to_503() {
        let resp = ApiError(CoreError::BackendUnavailable("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn quota_exceeded_maps_to_429() {
        let resp = ApiError(CoreError::QuotaExceeded("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn timeout_maps_to_504() {
        let resp = ApiError(CoreError::Timeout("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn internal_maps_to_500() {
        let resp = ApiError(CoreError::Internal("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
