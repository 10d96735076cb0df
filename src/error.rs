// ABOUTME: Request-level error taxonomy and its mapping onto HTTP responses
// ABOUTME: Validation, not-found, transient-storage, and transcode failures

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::CACHE_FOR_A_YEAR;

/// Failure modes of one resize request. Detail stays server-side; callers
/// only see the status code and, for validation errors, the offending value.
#[derive(Debug, Error)]
pub enum ResizeError {
    /// The `f` query parameter named an unknown variant
    #[error("Invalid size: {0}!")]
    InvalidVariant(String),
    /// The source store confirmed the original does not exist
    #[error("original not found: {0}")]
    OriginalNotFound(String),
    /// The source store failed for a reason other than absence
    #[error("storage unavailable")]
    StorageUnavailable(#[source] anyhow::Error),
    /// identify or convert failed; nothing was stored
    #[error("transcode failed")]
    Transcode(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl IntoResponse for ResizeError {
    fn into_response(self) -> Response {
        match self {
            ResizeError::InvalidVariant(value) => {
                (StatusCode::BAD_REQUEST, format!("Invalid size: {}!", value)).into_response()
            }
            // The confirmed absence of an original is as cacheable as its content
            ResizeError::OriginalNotFound(_) => (
                StatusCode::NOT_FOUND,
                [(header::CACHE_CONTROL, CACHE_FOR_A_YEAR)],
                (),
            )
                .into_response(),
            ResizeError::StorageUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Upstream storage unavailable, retry later",
            )
                .into_response(),
            ResizeError::Transcode(_) | ResizeError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_invalid_variant_message() {
        let err = ResizeError::InvalidVariant("bogus".to_string());
        assert_eq!(err.to_string(), "Invalid size: bogus!");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_is_cacheable() {
        let resp = ResizeError::OriginalNotFound("missing.jpeg".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap().to_str().unwrap(),
            CACHE_FOR_A_YEAR
        );
    }

    #[test]
    fn test_transient_storage_failure_is_not_cacheable() {
        let resp = ResizeError::StorageUnavailable(anyhow!("connect timeout")).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().get(header::CACHE_CONTROL).is_none());
    }

    #[test]
    fn test_transcode_failure_is_internal() {
        let resp = ResizeError::Transcode(anyhow!("convert exited with 1")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
