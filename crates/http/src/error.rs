//! HTTP error responses.
//!
//! Cache errors are mapped to status codes and rendered as
//! `{"error": {"code": ..., "message": ...}}`. Messages of 5xx responses are
//! generic; the underlying error only goes to the log.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use replaydeck_assets::Error;
use serde::Serialize;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Error details
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. `NOT_FOUND`)
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

/// An asset cache error on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    /// Status code and machine-readable code for this error.
    #[must_use]
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            Error::AssetNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::AuthenticationFailed { .. }
            | Error::RemoteNotFound { .. }
            | Error::Transport { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Error::MetadataUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            Error::InvalidAssetPath { .. } | Error::CacheIo { .. } | Error::Configuration { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match status {
            StatusCode::BAD_GATEWAY => {
                tracing::error!(error = %self.0, "remote fetch failed");
                "The asset could not be fetched from remote storage".to_string()
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                tracing::warn!(error = %self.0, "metadata store unavailable");
                "The metadata store is unavailable".to_string()
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self.0, "internal server error");
                "An internal error occurred".to_string()
            }
            _ => self.0.to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaydeck_assets::AssetId;

    fn status(err: Error) -> StatusCode {
        ApiError(err).status_and_code().0
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(Error::asset_not_found(AssetId::new(1))), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::authentication_failed("h", "denied")), StatusCode::BAD_GATEWAY);
        assert_eq!(status(Error::remote_not_found("h", "/a.mp3")), StatusCode::BAD_GATEWAY);
        assert_eq!(status(Error::transport("reset")), StatusCode::BAD_GATEWAY);
        assert_eq!(status(Error::metadata("down")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(Error::invalid_asset_path("/a/..", "relative")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(Error::cache_io(std::io::Error::other("full"), "/c", "rename")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_keeps_message() {
        let response = ApiError(Error::asset_not_found(AssetId::new(7))).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
