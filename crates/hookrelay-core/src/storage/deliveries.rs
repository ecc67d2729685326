//! Repository for delivery database operations.
//!
//! Every state change on a delivery is a conditional update guarded by
//! `status = 'pending' AND attempts = <observed>`. The boolean results tell
//! the caller whether its transition won.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Delivery, DeliveryId, DeliveryQuery, DeliveryTransition, SubscriptionId},
};

/// Repository for delivery database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a new delivery.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails, including when the owning subscription
    /// was deleted concurrently.
    pub async fn create(&self, delivery: &Delivery) -> Result<DeliveryId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhook_deliveries (
                id, subscription_id, event_type, payload, status, attempts,
                next_retry_at, last_response_code, last_response_body, last_error,
                created_at, delivered_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            ",
        )
        .bind(delivery.id)
        .bind(delivery.subscription_id)
        .bind(&delivery.event_type)
        .bind(&delivery.payload)
        .bind(delivery.status)
        .bind(delivery.attempts)
        .bind(delivery.next_retry_at)
        .bind(delivery.last_response_code)
        .bind(&delivery.last_response_body)
        .bind(&delivery.last_error)
        .bind(delivery.created_at)
        .bind(delivery.delivered_at)
        .bind(delivery.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(DeliveryId(id))
    }

    /// Finds a delivery by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r"
            SELECT id, subscription_id, event_type, payload, status, attempts,
                   next_retry_at, last_response_code, last_response_body, last_error,
                   created_at, delivered_at, updated_at
            FROM webhook_deliveries
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(delivery)
    }

    /// Lists deliveries for a subscription, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        query: DeliveryQuery,
    ) -> Result<Vec<Delivery>> {
        let query = query.normalized();
        let deliveries = sqlx::query_as::<_, Delivery>(
            r"
            SELECT id, subscription_id, event_type, payload, status, attempts,
                   next_retry_at, last_response_code, last_response_body, last_error,
                   created_at, delivered_at, updated_at
            FROM webhook_deliveries
            WHERE subscription_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(subscription_id)
        .bind(query.status)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }

    /// Marks a pending delivery as delivered.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_succeeded(&self, id: DeliveryId, update: &DeliveryTransition) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'success',
                attempts = $3,
                next_retry_at = NULL,
                last_response_code = $4,
                last_response_body = $5,
                last_error = NULL,
                delivered_at = $6,
                updated_at = $6
            WHERE id = $1 AND status = 'pending' AND attempts = $2
            ",
        )
        .bind(id)
        .bind(update.expected_attempts)
        .bind(update.attempts)
        .bind(update.response_code)
        .bind(&update.response_body)
        .bind(update.at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed attempt and arms the next one.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn schedule_retry(
        &self,
        id: DeliveryId,
        update: &DeliveryTransition,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET attempts = $3,
                next_retry_at = $4,
                last_response_code = $5,
                last_response_body = $6,
                last_error = $7,
                updated_at = $8
            WHERE id = $1 AND status = 'pending' AND attempts = $2
            ",
        )
        .bind(id)
        .bind(update.expected_attempts)
        .bind(update.attempts)
        .bind(next_retry_at)
        .bind(update.response_code)
        .bind(&update.response_body)
        .bind(&update.error)
        .bind(update.at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Moves a pending delivery to the terminal failed state.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_failed(&self, id: DeliveryId, update: &DeliveryTransition) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'failed',
                attempts = $3,
                next_retry_at = NULL,
                last_response_code = COALESCE($4, last_response_code),
                last_response_body = COALESCE($5, last_response_body),
                last_error = $6,
                updated_at = $7
            WHERE id = $1 AND status = 'pending' AND attempts = $2
            ",
        )
        .bind(id)
        .bind(update.expected_attempts)
        .bind(update.attempts)
        .bind(update.response_code)
        .bind(&update.response_body)
        .bind(&update.error)
        .bind(update.at)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Re-opens every failed delivery of a subscription as a fresh pending
    /// cycle and returns their IDs.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn reset_failed_for_subscription(
        &self,
        subscription_id: SubscriptionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryId>> {
        let ids = sqlx::query_scalar::<_, DeliveryId>(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending',
                attempts = 0,
                next_retry_at = NULL,
                last_response_code = NULL,
                last_response_body = NULL,
                last_error = NULL,
                delivered_at = NULL,
                updated_at = $2
            WHERE subscription_id = $1 AND status = 'failed'
            RETURNING id
            ",
        )
        .bind(subscription_id)
        .bind(now)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids)
    }

    /// Re-opens one failed delivery. Returns false if it is not failed.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn reset_failed(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending',
                attempts = 0,
                next_retry_at = NULL,
                last_response_code = NULL,
                last_response_body = NULL,
                last_error = NULL,
                delivered_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'failed'
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Finds pending deliveries whose attempt was due at or before `cutoff`.
    ///
    /// Deliveries that never got a first attempt are due from their creation
    /// time.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_due_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Delivery>> {
        let deliveries = sqlx::query_as::<_, Delivery>(
            r"
            SELECT id, subscription_id, event_type, payload, status, attempts,
                   next_retry_at, last_response_code, last_response_body, last_error,
                   created_at, delivered_at, updated_at
            FROM webhook_deliveries
            WHERE status = 'pending'
              AND COALESCE(next_retry_at, created_at) <= $1
            ORDER BY COALESCE(next_retry_at, created_at) ASC
            LIMIT $2
            ",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(deliveries)
    }
}
