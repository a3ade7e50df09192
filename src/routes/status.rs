//! Transfer status polling.

use axum::{
    extract::{Path as AxumPath, State},
    Json,
};

use super::ApiError;
use crate::xfer::types::TransferStatus;
use crate::AppState;

/// `GET /api/status/{id}`: snapshot of one transfer.
pub async fn status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<TransferStatus>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}
