//! Subscription management endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use hookrelay_core::{Delivery, DeliveryId, DeliveryQuery, SubscriptionId, SubscriptionPatch, SubscriptionView};
use hookrelay_delivery::{CreatedSubscription, NewSubscription};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::error::ApiError;
use crate::AppState;

/// Response carrying a freshly generated secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct SecretResponse {
    /// New signing secret.
    pub secret: String,
}

/// Response to a queued test delivery.
#[derive(Debug, Serialize, Deserialize)]
pub struct TestWebhookResponse {
    /// Delivery carrying the test event.
    pub delivery_id: DeliveryId,
}

/// Response to a bulk retry.
#[derive(Debug, Serialize, Deserialize)]
pub struct RetryFailedResponse {
    /// Failed deliveries that were re-opened.
    pub retried: usize,
}

/// `GET /subscriptions`
#[instrument(name = "list_subscriptions", skip(state))]
pub async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubscriptionView>>, ApiError> {
    Ok(Json(state.engine.registry().list().await?))
}

/// `POST /subscriptions`
///
/// The secret is returned here and by secret rotation only.
#[instrument(name = "create_subscription", skip(state, body))]
pub async fn create_subscription(
    State(state): State<AppState>,
    body: Result<Json<NewSubscription>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedSubscription>), ApiError> {
    let Json(input) = body?;
    let created = state.engine.registry().create(input).await?;
    info!(subscription_id = %created.id, "subscription created");
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /subscriptions/{id}`
#[instrument(name = "get_subscription", skip(state, id))]
pub async fn get_subscription(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SubscriptionView>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.engine.registry().get(SubscriptionId(id)).await?))
}

/// `PATCH /subscriptions/{id}`
#[instrument(name = "update_subscription", skip(state, id, body))]
pub async fn update_subscription(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<SubscriptionPatch>, JsonRejection>,
) -> Result<Json<SubscriptionView>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = body?;
    Ok(Json(state.engine.registry().update(SubscriptionId(id), patch).await?))
}

/// `DELETE /subscriptions/{id}`
#[instrument(name = "delete_subscription", skip(state, id))]
pub async fn delete_subscription(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.engine.registry().delete(SubscriptionId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /subscriptions/{id}/secret`
#[instrument(name = "regenerate_secret", skip(state, id))]
pub async fn regenerate_secret(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SecretResponse>, ApiError> {
    let Path(id) = id?;
    let secret = state.engine.registry().regenerate_secret(SubscriptionId(id)).await?;
    Ok(Json(SecretResponse { secret }))
}

/// `POST /subscriptions/{id}/test`
#[instrument(name = "test_webhook", skip(state, id))]
pub async fn test_webhook(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<(StatusCode, Json<TestWebhookResponse>), ApiError> {
    let Path(id) = id?;
    let delivery_id = state.engine.test_webhook(SubscriptionId(id)).await?;
    Ok((StatusCode::ACCEPTED, Json(TestWebhookResponse { delivery_id })))
}

/// `POST /subscriptions/{id}/retry-failed`
#[instrument(name = "retry_failed_deliveries", skip(state, id))]
pub async fn retry_failed_deliveries(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RetryFailedResponse>, ApiError> {
    let Path(id) = id?;
    let retried = state.engine.retry_failed_deliveries(SubscriptionId(id)).await?;
    Ok(Json(RetryFailedResponse { retried }))
}

/// `GET /subscriptions/{id}/deliveries?status=&limit=&offset=`
#[instrument(name = "list_deliveries", skip(state, id, query))]
pub async fn list_deliveries(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<DeliveryQuery>, QueryRejection>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    let Path(id) = id?;
    let Query(query) = query?;
    Ok(Json(state.engine.history().list_for_subscription(SubscriptionId(id), query).await?))
}
