//! Repository for webhook subscription database operations.
//!
//! Subscriptions hold the destination URL, signing secret, selected event
//! types and the circuit breaker counter. Counter and flag changes are
//! expressed as single `UPDATE` statements that read and write the same row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{FailureCount, SubscriptionId, SubscriptionPatch, WebhookSubscription},
};

/// Repository for subscription database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Inserts a new subscription.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails or constraints are violated.
    pub async fn create(&self, subscription: &WebhookSubscription) -> Result<SubscriptionId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO webhook_subscriptions (
                id, name, url, secret, event_types, active, failure_count,
                last_triggered_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(subscription.id)
        .bind(&subscription.name)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(&subscription.event_types)
        .bind(subscription.active)
        .bind(subscription.failure_count)
        .bind(subscription.last_triggered_at)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(SubscriptionId(id))
    }

    /// Finds a subscription by ID.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Option<WebhookSubscription>> {
        let subscription = sqlx::query_as::<_, WebhookSubscription>(
            r"
            SELECT id, name, url, secret, event_types, active, failure_count,
                   last_triggered_at, created_at, updated_at
            FROM webhook_subscriptions
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Lists all subscriptions, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn list(&self) -> Result<Vec<WebhookSubscription>> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            r"
            SELECT id, name, url, secret, event_types, active, failure_count,
                   last_triggered_at, created_at, updated_at
            FROM webhook_subscriptions
            ORDER BY created_at DESC
            ",
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Finds active subscriptions that selected `event_type`.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_active_for_event(
        &self,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            r"
            SELECT id, name, url, secret, event_types, active, failure_count,
                   last_triggered_at, created_at, updated_at
            FROM webhook_subscriptions
            WHERE active = true AND $1 = ANY(event_types)
            ORDER BY created_at ASC
            ",
        )
        .bind(event_type)
        .fetch_all(&*self.pool)
        .await?;

        Ok(subscriptions)
    }

    /// Applies a partial update and returns the new row.
    ///
    /// Reactivating an inactive subscription zeroes its failure counter in
    /// the same statement. Returns `None` if the subscription does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update(
        &self,
        id: SubscriptionId,
        patch: &SubscriptionPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookSubscription>> {
        let subscription = sqlx::query_as::<_, WebhookSubscription>(
            r"
            UPDATE webhook_subscriptions
            SET name = COALESCE($2, name),
                url = COALESCE($3, url),
                event_types = COALESCE($4, event_types),
                failure_count = CASE
                    WHEN $5 = true AND active = false THEN 0
                    ELSE failure_count
                END,
                active = COALESCE($5, active),
                updated_at = $6
            WHERE id = $1
            RETURNING id, name, url, secret, event_types, active, failure_count,
                      last_triggered_at, created_at, updated_at
            ",
        )
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.url.as_deref())
        .bind(patch.event_types.as_deref())
        .bind(patch.active)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(subscription)
    }

    /// Replaces the signing secret. Returns false if the subscription does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn update_secret(
        &self,
        id: SubscriptionId,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET secret = $2, updated_at = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(secret)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a subscription together with its deliveries and attempts.
    ///
    /// Owned rows are removed explicitly in the same transaction before the
    /// subscription itself. Returns false if the subscription did not exist.
    ///
    /// # Errors
    ///
    /// Returns error if any statement fails; the transaction is rolled back.
    pub async fn delete(&self, id: SubscriptionId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM webhook_delivery_attempts WHERE subscription_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM webhook_deliveries WHERE subscription_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records that an event fanned out to this subscription.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn touch_last_triggered(&self, id: SubscriptionId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE webhook_subscriptions SET last_triggered_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    /// Increments the failure counter and deactivates the subscription once
    /// it reaches `threshold`.
    ///
    /// Returns `None` if the subscription no longer exists.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn increment_failure_count(
        &self,
        id: SubscriptionId,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureCount>> {
        let count = sqlx::query_as::<_, FailureCount>(
            r"
            UPDATE webhook_subscriptions
            SET failure_count = failure_count + 1,
                active = CASE WHEN failure_count + 1 >= $2 THEN false ELSE active END,
                updated_at = $3
            WHERE id = $1
            RETURNING failure_count, active
            ",
        )
        .bind(id)
        .bind(threshold)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(count)
    }

    /// Resets the failure counter to zero.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn reset_failure_count(&self, id: SubscriptionId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET failure_count = 0, updated_at = $2
            WHERE id = $1 AND failure_count <> 0
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
