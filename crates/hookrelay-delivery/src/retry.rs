//! Retry policy and the failure side of the delivery state machine.
//!
//! Backoff follows a fixed table indexed by the 1-based attempt number.
//! Attempts past the end of the table reuse its last entry. Once
//! `max_attempts` is reached the delivery fails permanently and the
//! subscription's circuit breaker counts it.
//!
//! Manual retries re-open failed deliveries as a fresh cycle: attempts
//! back to zero, error context cleared, first attempt scheduled
//! immediately.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    Clock, Delivery, DeliveryId, DeliveryStatus, DeliveryTransition, SubscriptionId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    circuit::CircuitBreaker,
    error::{DeliveryError, Result},
    scheduler::{offset, Job, Scheduler},
    storage::WebhookStorage,
};

/// Backoff table in milliseconds: 1 min, 5 min, 30 min, 2 h, 12 h.
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [60_000, 300_000, 1_800_000, 7_200_000, 43_200_000];

/// Attempts per delivery cycle before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Error stored on deliveries that ran out of attempts.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Retry policy configuration for webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, including the first.
    pub max_attempts: u32,

    /// Delay after each failed attempt in milliseconds, indexed from the
    /// first attempt.
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, backoff_ms: DEFAULT_BACKOFF_MS.to_vec() }
    }
}

/// Result of retry decision calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery at the specified time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry - delivery permanently failed.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for zero attempts or an empty table.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be at least 1"));
        }
        if self.backoff_ms.is_empty() {
            return Err(DeliveryError::configuration("backoff table must not be empty"));
        }
        Ok(())
    }

    /// Delay after the failure of `attempt_number` (1-based).
    ///
    /// Numbers below 1 are treated as 1; numbers past the table clamp to
    /// its last entry.
    pub fn backoff(&self, attempt_number: u32) -> Duration {
        let index = attempt_number.saturating_sub(1) as usize;
        let millis = self
            .backoff_ms
            .get(index)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(millis)
    }

    /// Decides what happens after `attempt_number` failed at `failed_at`.
    pub fn decide(&self, attempt_number: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp { reason: MAX_RETRIES_EXCEEDED.to_string() };
        }

        RetryDecision::Retry { next_attempt_at: offset(failed_at, self.backoff(attempt_number)) }
    }
}

/// Error context of a failed attempt, persisted on the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    /// Response status, if a response arrived.
    pub response_code: Option<i32>,
    /// Truncated response body, if a response arrived.
    pub response_body: Option<String>,
    /// Failure description.
    pub error: String,
}

/// What the retry scheduler did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureResolution {
    /// Next attempt armed.
    Rescheduled {
        /// When it runs.
        next_attempt_at: DateTime<Utc>,
    },
    /// Delivery failed permanently.
    Exhausted,
    /// Another run moved the delivery first; nothing was changed.
    Superseded,
}

/// Failure handling and manual retries.
pub struct RetryScheduler {
    storage: Arc<dyn WebhookStorage>,
    scheduler: Arc<dyn Scheduler>,
    circuit: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl RetryScheduler {
    /// Creates a retry scheduler.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        scheduler: Arc<dyn Scheduler>,
        circuit: Arc<CircuitBreaker>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self { storage, scheduler, circuit, clock, policy }
    }

    /// Applies the state machine to a failed attempt.
    ///
    /// `delivery` is the row as loaded before the attempt; its `attempts`
    /// value guards the transition.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the transition cannot be written. A
    /// scheduling failure after a successful write is only logged: the
    /// recovery sweep picks the delivery up once it is due.
    pub async fn handle_failure(
        &self,
        delivery: &Delivery,
        attempt_number: i32,
        failure: FailureContext,
    ) -> Result<FailureResolution> {
        let now = self.clock.now();
        let decision = self.policy.decide(u32::try_from(attempt_number).unwrap_or(0), now);

        match decision {
            RetryDecision::Retry { next_attempt_at } => {
                let transition = DeliveryTransition {
                    expected_attempts: delivery.attempts,
                    attempts: attempt_number,
                    response_code: failure.response_code,
                    response_body: failure.response_body,
                    error: Some(failure.error),
                    at: now,
                };
                let applied = self
                    .storage
                    .schedule_delivery_retry(delivery.id, transition, next_attempt_at)
                    .await?;
                if !applied {
                    debug!(delivery_id = %delivery.id, "retry superseded by concurrent run");
                    return Ok(FailureResolution::Superseded);
                }

                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    attempt = attempt_number,
                    next_attempt_at = %next_attempt_at,
                    "delivery attempt failed, retry scheduled"
                );

                if let Err(e) =
                    self.scheduler.run_at(next_attempt_at, Job::AttemptDelivery(delivery.id)).await
                {
                    warn!(
                        delivery_id = %delivery.id,
                        error = %e,
                        "failed to schedule retry, leaving it to the recovery sweep"
                    );
                }

                Ok(FailureResolution::Rescheduled { next_attempt_at })
            },
            RetryDecision::GiveUp { reason } => {
                let transition = DeliveryTransition {
                    expected_attempts: delivery.attempts,
                    attempts: attempt_number,
                    response_code: failure.response_code,
                    response_body: failure.response_body,
                    error: Some(reason),
                    at: now,
                };
                if !self.storage.fail_delivery(delivery.id, transition).await? {
                    debug!(delivery_id = %delivery.id, "failure superseded by concurrent run");
                    return Ok(FailureResolution::Superseded);
                }

                warn!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    attempts = attempt_number,
                    last_error = %failure.error,
                    "delivery permanently failed"
                );

                self.circuit.record_permanent_failure(delivery.subscription_id).await?;

                Ok(FailureResolution::Exhausted)
            },
        }
    }

    /// Re-opens every failed delivery of a subscription and schedules each
    /// immediately. Returns how many were re-opened.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` for an unknown subscription, or a
    /// storage error.
    pub async fn retry_failed_deliveries(&self, subscription_id: SubscriptionId) -> Result<usize> {
        if self.storage.find_subscription(subscription_id).await?.is_none() {
            return Err(DeliveryError::SubscriptionNotFound { id: subscription_id });
        }

        let ids = self.storage.reset_failed_deliveries(subscription_id, self.clock.now()).await?;
        for id in &ids {
            self.schedule_now(*id).await;
        }

        info!(
            subscription_id = %subscription_id,
            retried = ids.len(),
            "failed deliveries re-queued"
        );

        Ok(ids.len())
    }

    /// Re-opens a single failed delivery and schedules it immediately.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryNotFound` for an unknown delivery, a validation
    /// error if it is not failed, or a storage error.
    pub async fn retry_delivery(&self, delivery_id: DeliveryId) -> Result<()> {
        let Some(delivery) = self.storage.find_delivery(delivery_id).await? else {
            return Err(DeliveryError::DeliveryNotFound { id: delivery_id });
        };

        if delivery.status != DeliveryStatus::Failed {
            return Err(DeliveryError::validation(format!(
                "delivery {delivery_id} is {} and cannot be retried",
                delivery.status
            )));
        }

        if !self.storage.reset_failed_delivery(delivery_id, self.clock.now()).await? {
            return Err(DeliveryError::validation(format!(
                "delivery {delivery_id} is no longer failed"
            )));
        }

        self.schedule_now(delivery_id).await;
        info!(delivery_id = %delivery_id, "failed delivery re-queued");
        Ok(())
    }

    async fn schedule_now(&self, delivery_id: DeliveryId) {
        if let Err(e) =
            self.scheduler.run_after(Duration::ZERO, Job::AttemptDelivery(delivery_id)).await
        {
            warn!(
                delivery_id = %delivery_id,
                error = %e,
                "failed to schedule delivery, leaving it to the recovery sweep"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn backoff_follows_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(300));
        assert_eq!(policy.backoff(3), Duration::from_secs(1800));
        assert_eq!(policy.backoff(4), Duration::from_secs(7200));
        assert_eq!(policy.backoff(5), Duration::from_secs(43_200));
    }

    #[test]
    fn backoff_clamps_at_both_ends() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(60));
        assert_eq!(policy.backoff(6), Duration::from_millis(43_200_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(43_200_000));
    }

    #[test]
    fn retry_until_max_attempts() {
        let policy = RetryPolicy::default();

        for attempt in 1..5 {
            let expected = at() + chrono::Duration::from_std(policy.backoff(attempt)).unwrap();
            assert_eq!(
                policy.decide(attempt, at()),
                RetryDecision::Retry { next_attempt_at: expected }
            );
        }

        assert_eq!(
            policy.decide(5, at()),
            RetryDecision::GiveUp { reason: MAX_RETRIES_EXCEEDED.to_string() }
        );
    }

    #[test]
    fn custom_policy_respected() {
        let policy = RetryPolicy { max_attempts: 2, backoff_ms: vec![10] };
        assert_eq!(
            policy.decide(1, at()),
            RetryDecision::Retry { next_attempt_at: at() + chrono::Duration::milliseconds(10) }
        );
        assert!(matches!(policy.decide(2, at()), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn invalid_policies_rejected() {
        assert!(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }.validate().is_err());
        assert!(RetryPolicy { max_attempts: 3, backoff_ms: vec![] }.validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn backoff_past_table_is_last_entry(attempt in 6u32..10_000) {
            prop_assert_eq!(RetryPolicy::default().backoff(attempt), Duration::from_millis(43_200_000));
        }

        #[test]
        fn backoff_is_non_decreasing(attempt in 1u32..100) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.backoff(attempt + 1) >= policy.backoff(attempt));
        }

        #[test]
        fn retry_is_always_in_the_future(attempt in 1u32..5) {
            match RetryPolicy::default().decide(attempt, at()) {
                RetryDecision::Retry { next_attempt_at } => prop_assert!(next_attempt_at > at()),
                RetryDecision::GiveUp { .. } => prop_assert!(false, "gave up before max attempts"),
            }
        }
    }
}
