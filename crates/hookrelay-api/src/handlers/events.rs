//! Event submission.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use hookrelay_core::EventType;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::error::ApiError;
use crate::AppState;

/// Request body for event submission.
#[derive(Debug, Deserialize)]
pub struct EnqueueEventRequest {
    /// Catalog event name, e.g. `deal.won`.
    pub event_type: String,
    /// Arbitrary JSON forwarded to receivers as `data`.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Response to an accepted event.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueEventResponse {
    /// Deliveries created, one per matching active subscription.
    pub deliveries_created: usize,
}

/// Fans an event out to matching subscriptions.
///
/// Always 202 for a catalog event, even when nothing matched or some
/// deliveries could not be created.
///
/// # Errors
///
/// 400 for a malformed body or an event outside the catalog.
#[instrument(name = "enqueue_event", skip(state, body))]
pub async fn enqueue_event(
    State(state): State<AppState>,
    body: Result<Json<EnqueueEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueEventResponse>), ApiError> {
    let Json(request) = body?;

    let event_type = request
        .event_type
        .parse::<EventType>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let deliveries_created = state.engine.enqueue_event(event_type, request.payload).await;
    info!(event = %event_type, deliveries_created, "event accepted");

    Ok((StatusCode::ACCEPTED, Json(EnqueueEventResponse { deliveries_created })))
}
