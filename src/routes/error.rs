//! Conversion of [`XferError`] into HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::error::XferError;

/// Handler error: renders as `{"error": ..., "code": ...}` with a status by kind.
#[derive(Debug)]
pub struct ApiError(pub XferError);

impl From<XferError> for ApiError {
    fn from(e: XferError) -> Self {
        Self(e)
    }
}

/// HTTP status for each error kind.
pub fn status_for(e: &XferError) -> StatusCode {
    match e {
        XferError::InvalidPath { .. }
        | XferError::InvalidRequest(_)
        | XferError::UnsupportedAlgorithm(_)
        | XferError::EmptyDirectory(_)
        | XferError::Config(_) => StatusCode::BAD_REQUEST,
        XferError::NotFound(_) | XferError::TransferNotFound(_) => StatusCode::NOT_FOUND,
        XferError::AlgorithmMismatch { .. } | XferError::DigestMismatch { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        XferError::Remote { .. } => StatusCode::BAD_GATEWAY,
        XferError::Io { .. } | XferError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(code = self.0.code(), "Request failed: {}", self.0);
        }
        (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "code": self.0.code(),
            })),
        )
            .into_response()
    }
}
