//! Error taxonomy for HTTP handlers.
//!
//! Every failure leaves a handler as an `AppError`. Client errors carry a
//! short message; server-side failures are logged with a correlation id and
//! only the id reaches the client.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cragcache_core::api::ApiError;
use cragcache_core::auth::CsrfError;
use cragcache_core::geocode::GeocodeError;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Upstream service failed")]
    Upstream(#[source] anyhow::Error),

    #[error("Unexpected error")]
    Unknown(#[source] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) | AppError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Upstream(ref cause) | AppError::Unknown(ref cause) => {
                let correlation_id = Uuid::new_v4().to_string();
                error!(correlation_id = %correlation_id, error = %format!("{:#}", cause), "Request failed");
                let body = json!({ "error": self.to_string(), "correlation_id": correlation_id });
                (status, Json(body)).into_response()
            }
            AppError::RateLimited { retry_after_secs } => {
                let body = json!({ "error": self.to_string() });
                (
                    status,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    Json(body),
                )
                    .into_response()
            }
            _ => (status, Json(json!({ "error": self.to_string() }))).into_response(),
        }
    }
}

/// Backend failures keep their meaning where it matters to the client;
/// anything else is an upstream failure.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ApiError>() {
            Some(ApiError::Unauthorized) => AppError::Unauthenticated,
            Some(ApiError::AccessDenied(_)) => AppError::Forbidden("Access denied".to_string()),
            Some(ApiError::NotFound(_)) => AppError::NotFound("Not found".to_string()),
            Some(ApiError::BadRequest(_)) => AppError::Validation("Request rejected".to_string()),
            _ => AppError::Upstream(err),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<CsrfError> for AppError {
    fn from(err: CsrfError) -> Self {
        debug!(reason = %err, "CSRF check failed");
        AppError::Forbidden("Invalid CSRF token".to_string())
    }
}

impl From<GeocodeError> for AppError {
    fn from(err: GeocodeError) -> Self {
        match err {
            GeocodeError::InvalidCoordinates(msg) => AppError::Validation(msg),
            GeocodeError::NoResult => AppError::NotFound("No address found for location".to_string()),
            other => AppError::Upstream(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upstream_error_is_sanitized() {
        let err = AppError::Upstream(anyhow::anyhow!("password=hunter2 connection refused"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Upstream service failed");
        assert!(!body["correlation_id"].as_str().unwrap().is_empty());
        assert!(!body.to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn test_api_error_mapping() {
        let unauthorized: AppError = anyhow::Error::from(ApiError::Unauthorized).into();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let missing: AppError = anyhow::Error::from(ApiError::NotFound("x".into())).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let server: AppError = anyhow::Error::from(ApiError::ServerError("boom".into())).into();
        assert_eq!(server.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let other: AppError = anyhow::anyhow!("socket closed").into();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_csrf_and_geocode_mapping() {
        assert_eq!(AppError::from(CsrfError::Mismatch).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(GeocodeError::InvalidCoordinates("lat".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::from(GeocodeError::NoResult).status(), StatusCode::NOT_FOUND);
    }
}
