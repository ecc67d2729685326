//! Per-subscription circuit breaker.
//!
//! Counts deliveries that were permanently given up on, not individual HTTP
//! failures. A subscription whose counter reaches the threshold is
//! deactivated and stays off until someone re-enables it.
//!
//! # State Machine
//!
//! ```text
//!   ┌──────────────────────────┐   exhausted delivery    ┌──────────────────────┐
//!   │          ACTIVE          │ ──────────────────────▶ │  ACTIVE, count + 1   │
//!   │   failure_count < N      │ ◀────────────────────── │                      │
//!   └──────────────────────────┘  any delivery succeeds  └──────────────────────┘
//!                │                    (count = 0)                  │
//!                │                                                 │ count reaches N
//!                │                                                 ▼
//!                │        manual reactivation         ┌──────────────────────┐
//!                └◀──────────────(count = 0)───────── │       INACTIVE       │
//!                                                     │  deliveries fail fast │
//!                                                     └──────────────────────┘
//! ```
//!
//! The increment and the deactivation happen in one storage statement, so
//! concurrent exhaustions cannot skip past the threshold or lose counts.

use std::sync::Arc;

use hookrelay_core::{Clock, FailureCount, SubscriptionId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{DeliveryError, Result},
    storage::WebhookStorage,
};

/// Circuit breaker configuration shared by all subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Permanently failed deliveries in a row that disable a subscription.
    pub failure_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { failure_threshold: 10 }
    }
}

impl CircuitConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero threshold.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(DeliveryError::configuration("failure_threshold must be at least 1"));
        }
        Ok(())
    }

    fn threshold(&self) -> i32 {
        i32::try_from(self.failure_threshold).unwrap_or(i32::MAX)
    }
}

/// Applies circuit breaker updates through storage.
pub struct CircuitBreaker {
    storage: Arc<dyn WebhookStorage>,
    clock: Arc<dyn Clock>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    /// Creates a circuit breaker.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        clock: Arc<dyn Clock>,
        config: CircuitConfig,
    ) -> Self {
        Self { storage, clock, config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Counts one permanently failed delivery against the subscription.
    ///
    /// Returns the counter after the increment, or `None` if the
    /// subscription no longer exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub async fn record_permanent_failure(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<FailureCount>> {
        let threshold = self.config.threshold();
        let count = self
            .storage
            .increment_failure_count(subscription_id, threshold, self.clock.now())
            .await?;

        match count {
            Some(count) if count.failure_count >= threshold && !count.active => {
                warn!(
                    subscription_id = %subscription_id,
                    failure_count = count.failure_count,
                    threshold,
                    "circuit breaker tripped, subscription deactivated"
                );
            },
            Some(count) => {
                debug!(
                    subscription_id = %subscription_id,
                    failure_count = count.failure_count,
                    "recorded permanent delivery failure"
                );
            },
            None => {
                debug!(subscription_id = %subscription_id, "subscription gone, failure not counted");
            },
        }

        Ok(count)
    }

    /// Resets the subscription's counter after a successful delivery.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub async fn record_success(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.storage.reset_failure_count(subscription_id, self.clock.now()).await?;
        Ok(())
    }
}
