//! Delivery attempt executor.
//!
//! One call of [`DeliveryExecutor::execute`] performs at most one HTTP
//! attempt for one delivery and moves it to its next state. Every write is
//! guarded by the `(pending, attempts)` pair observed at load time, so a
//! duplicate run of the same job loses the race and changes nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hookrelay_core::{
    Clock, Delivery, DeliveryAttempt, DeliveryId, DeliveryStatus, DeliveryTransition,
    WebhookSubscription,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    circuit::CircuitBreaker,
    client::{AttemptOutcome, AttemptReport, DeliveryClient, SignedRequest},
    engine::EngineStats,
    error::Result,
    retry::{FailureContext, FailureResolution, RetryScheduler},
    storage::WebhookStorage,
};

/// Error stored when the owning subscription is deleted or inactive.
pub const SUBSCRIPTION_UNAVAILABLE: &str = "subscription not found or disabled";

/// What one executor run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Delivery missing or no longer pending. Nothing happened.
    Skipped,
    /// Subscription deleted or inactive; delivery failed without an attempt.
    SubscriptionUnavailable,
    /// Receiver answered 2xx.
    Delivered,
    /// Attempt failed and the next one is armed.
    RetryScheduled {
        /// When the next attempt runs.
        next_attempt_at: DateTime<Utc>,
    },
    /// Attempt failed and no attempts remain.
    Exhausted,
    /// Another run moved the delivery while this one was in flight.
    Superseded,
}

/// Runs delivery attempts.
pub struct DeliveryExecutor {
    storage: Arc<dyn WebhookStorage>,
    client: Arc<DeliveryClient>,
    retry: Arc<RetryScheduler>,
    circuit: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<EngineStats>>,
}

impl DeliveryExecutor {
    /// Creates an executor.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        client: Arc<DeliveryClient>,
        retry: Arc<RetryScheduler>,
        circuit: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        stats: Arc<RwLock<EngineStats>>,
    ) -> Self {
        Self { storage, client, retry, circuit, clock, stats }
    }

    /// Performs one attempt of `delivery_id`.
    ///
    /// # Errors
    ///
    /// Returns storage errors. HTTP failures are never errors; they are
    /// recorded and retried.
    pub async fn execute(&self, delivery_id: DeliveryId) -> Result<ExecutionOutcome> {
        let Some(delivery) = self.storage.find_delivery(delivery_id).await? else {
            debug!(delivery_id = %delivery_id, "delivery no longer exists, skipping");
            return Ok(ExecutionOutcome::Skipped);
        };

        if delivery.status != DeliveryStatus::Pending {
            debug!(
                delivery_id = %delivery_id,
                status = %delivery.status,
                "delivery already finished, skipping"
            );
            return Ok(ExecutionOutcome::Skipped);
        }

        let subscription = self
            .storage
            .find_subscription(delivery.subscription_id)
            .await?
            .filter(|subscription| subscription.active);

        let Some(subscription) = subscription else {
            return self.fail_unavailable(&delivery).await;
        };

        self.attempt(&delivery, &subscription).await
    }

    async fn fail_unavailable(&self, delivery: &Delivery) -> Result<ExecutionOutcome> {
        let transition = DeliveryTransition {
            expected_attempts: delivery.attempts,
            attempts: delivery.attempts,
            response_code: None,
            response_body: None,
            error: Some(SUBSCRIPTION_UNAVAILABLE.to_string()),
            at: self.clock.now(),
        };

        if !self.storage.fail_delivery(delivery.id, transition).await? {
            return Ok(ExecutionOutcome::Superseded);
        }

        info!(
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            "subscription not found or disabled, delivery failed"
        );
        Ok(ExecutionOutcome::SubscriptionUnavailable)
    }

    async fn attempt(
        &self,
        delivery: &Delivery,
        subscription: &WebhookSubscription,
    ) -> Result<ExecutionOutcome> {
        let attempt_number = delivery.attempts + 1;
        let attempted_at = self.clock.now();
        let request =
            SignedRequest::build(delivery, subscription, attempt_number, attempted_at.timestamp_millis())?;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let report = self.client.send(&request).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries = stats.in_flight_deliveries.saturating_sub(1);
            stats.deliveries_processed += 1;
        }

        match &report.outcome {
            AttemptOutcome::Success { status, body } => {
                let transition = DeliveryTransition {
                    expected_attempts: delivery.attempts,
                    attempts: attempt_number,
                    response_code: Some(i32::from(*status)),
                    response_body: Some(body.clone()),
                    error: None,
                    at: self.clock.now(),
                };

                if !self.storage.complete_delivery(delivery.id, transition).await? {
                    debug!(delivery_id = %delivery.id, "success superseded by concurrent run");
                    return Ok(ExecutionOutcome::Superseded);
                }

                self.record_attempt(delivery, attempt_number, attempted_at, &report).await;
                self.circuit.record_success(delivery.subscription_id).await?;
                self.stats.write().await.successful_deliveries += 1;

                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    attempt = attempt_number,
                    status,
                    "delivery succeeded"
                );
                Ok(ExecutionOutcome::Delivered)
            },
            outcome => {
                let failure = FailureContext {
                    response_code: outcome.status().map(i32::from),
                    response_body: outcome.body().map(str::to_string),
                    error: outcome.error_message().unwrap_or_default(),
                };

                let resolution = self.retry.handle_failure(delivery, attempt_number, failure).await?;
                if resolution == FailureResolution::Superseded {
                    return Ok(ExecutionOutcome::Superseded);
                }

                self.record_attempt(delivery, attempt_number, attempted_at, &report).await;

                let mut stats = self.stats.write().await;
                Ok(match resolution {
                    FailureResolution::Rescheduled { next_attempt_at } => {
                        stats.retries_scheduled += 1;
                        ExecutionOutcome::RetryScheduled { next_attempt_at }
                    },
                    FailureResolution::Exhausted => {
                        stats.permanent_failures += 1;
                        ExecutionOutcome::Exhausted
                    },
                    FailureResolution::Superseded => ExecutionOutcome::Superseded,
                })
            },
        }
    }

    /// Appends the attempt to the audit trail once its transition has been
    /// applied. A failed write is logged and does not undo the transition.
    async fn record_attempt(
        &self,
        delivery: &Delivery,
        attempt_number: i32,
        attempted_at: DateTime<Utc>,
        report: &AttemptReport,
    ) {
        let attempt = DeliveryAttempt {
            id: Uuid::new_v4(),
            delivery_id: delivery.id,
            subscription_id: delivery.subscription_id,
            attempt_number,
            response_status: report.outcome.status().map(i32::from),
            response_body: report.outcome.body().map(str::to_string),
            error_message: report.outcome.error_message(),
            succeeded: report.outcome.is_success(),
            duration_ms: i64::try_from(report.duration.as_millis()).unwrap_or(i64::MAX),
            attempted_at,
        };

        if let Err(e) = self.storage.record_attempt(attempt).await {
            warn!(
                delivery_id = %delivery.id,
                attempt = attempt_number,
                error = %e,
                "failed to record delivery attempt"
            );
        }
    }
}
