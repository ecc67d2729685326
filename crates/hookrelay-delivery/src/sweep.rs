//! Recovery sweep for pending deliveries without a live timer.
//!
//! Timers are in-memory, so a restart or a failed scheduling call can
//! strand a pending delivery. The sweeper periodically looks for pending
//! deliveries that are past due by more than a grace period and schedules
//! them again, skipping any the scheduler already holds.

use std::{sync::Arc, time::Duration};

use hookrelay_core::Clock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    scheduler::{Job, Scheduler},
    storage::WebhookStorage,
};

/// Recovery sweep settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// How long past due a delivery must be before it is considered lost.
    pub grace: Duration,
    /// Maximum deliveries re-scheduled per sweep.
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

impl SweepConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero interval or batch size.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(DeliveryError::configuration("sweep interval must be positive"));
        }
        if self.batch_size == 0 {
            return Err(DeliveryError::configuration("sweep batch size must be at least 1"));
        }
        Ok(())
    }
}

/// Periodically re-schedules stranded pending deliveries.
pub struct RecoverySweeper {
    storage: Arc<dyn WebhookStorage>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    cancellation_token: CancellationToken,
}

impl RecoverySweeper {
    /// Creates a sweeper.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { storage, scheduler, clock, config, cancellation_token }
    }

    /// Runs one sweep and returns how many deliveries were re-scheduled.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the due deliveries cannot be loaded.
    pub async fn sweep_once(&self) -> Result<usize> {
        let grace = chrono::Duration::from_std(self.config.grace)
            .map_err(|e| DeliveryError::configuration(format!("sweep grace out of range: {e}")))?;
        let cutoff = self.clock.now() - grace;
        let limit = i64::try_from(self.config.batch_size).unwrap_or(i64::MAX);

        let due = self.storage.find_due_pending(cutoff, limit).await?;
        let mut rescheduled = 0;

        for delivery in due {
            let job = Job::AttemptDelivery(delivery.id);
            if self.scheduler.has_outstanding(&job) {
                continue;
            }

            match self.scheduler.run_after(Duration::ZERO, job).await {
                Ok(()) => {
                    rescheduled += 1;
                    debug!(
                        delivery_id = %delivery.id,
                        attempts = delivery.attempts,
                        "re-scheduled stranded delivery"
                    );
                },
                Err(e) => {
                    warn!(delivery_id = %delivery.id, error = %e, "failed to re-schedule delivery");
                },
            }
        }

        if rescheduled > 0 {
            info!(rescheduled, "recovery sweep re-scheduled pending deliveries");
        }

        Ok(rescheduled)
    }

    /// Sweeps once immediately, then every interval until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns an error; failed sweeps are logged and retried on the
    /// next tick.
    pub async fn run(&self) -> Result<()> {
        info!(
            interval_seconds = self.config.interval.as_secs(),
            grace_seconds = self.config.grace.as_secs(),
            batch_size = self.config.batch_size,
            "recovery sweeper starting"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "recovery sweep failed");
            }

            tokio::select! {
                () = self.cancellation_token.cancelled() => {
                    info!("recovery sweeper stopping");
                    return Ok(());
                }
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}
