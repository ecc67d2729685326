//! Single-delivery endpoints.

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    Json,
};
use hookrelay_core::DeliveryId;
use hookrelay_delivery::DeliveryDetail;
use tracing::instrument;
use uuid::Uuid;

use super::error::ApiError;
use crate::AppState;

/// `GET /deliveries/{id}`: the delivery and its attempts.
#[instrument(name = "get_delivery", skip(state, id))]
pub async fn get_delivery(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeliveryDetail>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.engine.history().detail(DeliveryId(id)).await?))
}

/// `POST /deliveries/{id}/retry`: re-opens one failed delivery.
#[instrument(name = "retry_delivery", skip(state, id))]
pub async fn retry_delivery(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.engine.retry_delivery(DeliveryId(id)).await?;
    Ok(StatusCode::ACCEPTED)
}
