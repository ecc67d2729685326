//! Repository for delivery attempt database operations.
//!
//! Attempts are an append-only audit trail: one row per HTTP request sent,
//! never updated afterwards.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{DeliveryAttempt, DeliveryId},
};

/// Repository for delivery attempt database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create(&self, attempt: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO webhook_delivery_attempts (
                id, delivery_id, subscription_id, attempt_number,
                response_status, response_body, error_message,
                succeeded, duration_ms, attempted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(attempt.id)
        .bind(attempt.delivery_id)
        .bind(attempt.subscription_id)
        .bind(attempt.attempt_number)
        .bind(attempt.response_status)
        .bind(&attempt.response_body)
        .bind(&attempt.error_message)
        .bind(attempt.succeeded)
        .bind(attempt.duration_ms)
        .bind(attempt.attempted_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Finds all attempts for a delivery in the order they were made.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_delivery(&self, delivery_id: DeliveryId) -> Result<Vec<DeliveryAttempt>> {
        let attempts = sqlx::query_as::<_, DeliveryAttempt>(
            r"
            SELECT id, delivery_id, subscription_id, attempt_number,
                   response_status, response_body, error_message,
                   succeeded, duration_ms, attempted_at
            FROM webhook_delivery_attempts
            WHERE delivery_id = $1
            ORDER BY attempted_at ASC, attempt_number ASC
            ",
        )
        .bind(delivery_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(attempts)
    }
}
