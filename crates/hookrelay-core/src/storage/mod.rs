//! Database access layer implementing the repository pattern for webhook
//! persistence.
//!
//! Repositories translate between domain models and the Postgres schema.
//! Counters and state transitions are single-statement updates so that
//! concurrently completing deliveries never lose each other's writes.

use std::sync::Arc;

use sqlx::PgPool;

pub mod deliveries;
pub mod delivery_attempts;
pub mod subscriptions;

use crate::error::Result;

/// Schema statements executed at startup, in order.
pub const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS webhook_subscriptions (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        secret TEXT NOT NULL,
        event_types TEXT[] NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_triggered_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT event_types_not_empty CHECK (cardinality(event_types) > 0)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS webhook_deliveries (
        id UUID PRIMARY KEY,
        subscription_id UUID NOT NULL
            REFERENCES webhook_subscriptions(id) ON DELETE CASCADE,
        event_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        next_retry_at TIMESTAMPTZ,
        last_response_code INTEGER,
        last_response_body TEXT,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        delivered_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT delivery_status_valid CHECK (status IN ('pending', 'success', 'failed')),
        CONSTRAINT delivery_attempts_non_negative CHECK (attempts >= 0)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_subscription
        ON webhook_deliveries (subscription_id, created_at DESC)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_pending
        ON webhook_deliveries (status, next_retry_at)
        WHERE status = 'pending'
    ",
    r"
    CREATE TABLE IF NOT EXISTS webhook_delivery_attempts (
        id UUID PRIMARY KEY,
        delivery_id UUID NOT NULL
            REFERENCES webhook_deliveries(id) ON DELETE CASCADE,
        subscription_id UUID NOT NULL,
        attempt_number INTEGER NOT NULL,
        response_status INTEGER,
        response_body TEXT,
        error_message TEXT,
        succeeded BOOLEAN NOT NULL,
        duration_ms BIGINT NOT NULL,
        attempted_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_delivery_attempts_delivery
        ON webhook_delivery_attempts (delivery_id, attempt_number)
    ",
];

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for webhook subscriptions.
    pub subscriptions: Arc<subscriptions::Repository>,

    /// Repository for deliveries.
    pub deliveries: Arc<deliveries::Repository>,

    /// Repository for the attempt audit trail.
    pub delivery_attempts: Arc<delivery_attempts::Repository>,

    pool: Arc<PgPool>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            subscriptions: Arc::new(subscriptions::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool.clone())),
            delivery_attempts: Arc::new(delivery_attempts::Repository::new(pool.clone())),
            pool,
        }
    }

    /// Creates tables and indexes that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;

        Ok(())
    }
}
