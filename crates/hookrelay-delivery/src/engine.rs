//! Webhook engine wiring and lifecycle.
//!
//! The engine owns one instance of every component and connects them:
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Dispatcher │──▶│ TokioScheduler │──▶│ Worker Pool │──▶│   Executor   │
//! └────────────┘   └────────────────┘   └─────────────┘   └──────────────┘
//!       │                  ▲                                 │        │
//!       ▼                  │                                 ▼        ▼
//! ┌────────────┐   ┌────────────────┐               ┌──────────┐ ┌─────────┐
//! │  Storage   │◀──│ RecoverySweeper│               │  Retry   │ │ Circuit │
//! └────────────┘   └────────────────┘               └──────────┘ └─────────┘
//! ```
//!
//! Producers call [`WebhookEngine::enqueue_event`], which never fails.
//! Administrative calls go through [`WebhookEngine::registry`] and
//! [`WebhookEngine::history`].

use std::{sync::Arc, time::Duration};

use hookrelay_core::{Clock, DeliveryId, EventType, SubscriptionId};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    circuit::{CircuitBreaker, CircuitConfig},
    client::{ClientConfig, DeliveryClient},
    dispatcher::Dispatcher,
    error::{DeliveryError, Result},
    executor::DeliveryExecutor,
    history::DeliveryHistory,
    registry::SubscriptionRegistry,
    retry::{RetryPolicy, RetryScheduler},
    scheduler::{Job, JobTracker, Scheduler, TokioScheduler},
    storage::WebhookStorage,
    sweep::{RecoverySweeper, SweepConfig},
    worker_pool::WorkerPool,
};

/// Configuration for the webhook engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Attempt limit and backoff table.
    pub retry_policy: RetryPolicy,

    /// Consecutive permanent failures that disable a subscription.
    pub circuit_config: CircuitConfig,

    /// Recovery sweep settings.
    pub sweep_config: SweepConfig,

    /// Maximum time to wait for workers to finish in-flight attempts.
    pub shutdown_timeout: Duration,

    /// Reject plain `http` subscription URLs.
    pub require_https: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            circuit_config: CircuitConfig::default(),
            sweep_config: SweepConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            require_https: false,
        }
    }
}

impl DeliveryConfig {
    /// Validates every nested setting.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        if self.client_config.timeout.is_zero() {
            return Err(DeliveryError::configuration("client timeout must be positive"));
        }
        self.retry_policy.validate()?;
        self.circuit_config.validate()?;
        self.sweep_config.validate()
    }
}

/// Statistics for engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Number of active delivery workers.
    pub active_workers: usize,
    /// Executor runs since startup, including skipped ones.
    pub deliveries_processed: u64,
    /// Attempts answered with 2xx.
    pub successful_deliveries: u64,
    /// Failed attempts with another attempt armed.
    pub retries_scheduled: u64,
    /// Deliveries that ran out of attempts.
    pub permanent_failures: u64,
    /// Attempts currently waiting on a receiver.
    pub in_flight_deliveries: u64,
}

/// Main engine coordinating fan-out, delivery workers and recovery.
pub struct WebhookEngine {
    config: DeliveryConfig,
    storage: Arc<dyn WebhookStorage>,
    dispatcher: Dispatcher,
    registry: SubscriptionRegistry,
    history: DeliveryHistory,
    retry: Arc<RetryScheduler>,
    executor: Arc<DeliveryExecutor>,
    sweeper: Arc<RecoverySweeper>,
    tracker: JobTracker,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    queue: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    worker_pool: Mutex<Option<WorkerPool>>,
    sweeper_handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl WebhookEngine {
    /// Creates an engine. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings or if the HTTP
    /// client cannot be built.
    pub fn new(
        storage: Arc<dyn WebhookStorage>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let cancellation_token = CancellationToken::new();
        let tracker = JobTracker::new();
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        let (scheduler, queue) =
            TokioScheduler::new(clock.clone(), tracker.clone(), cancellation_token.clone());
        let dyn_scheduler: Arc<dyn Scheduler> = Arc::new(scheduler);

        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);
        let circuit = Arc::new(CircuitBreaker::new(
            storage.clone(),
            clock.clone(),
            config.circuit_config.clone(),
        ));
        let retry = Arc::new(RetryScheduler::new(
            storage.clone(),
            dyn_scheduler.clone(),
            circuit.clone(),
            clock.clone(),
            config.retry_policy.clone(),
        ));
        let executor = Arc::new(DeliveryExecutor::new(
            storage.clone(),
            client,
            retry.clone(),
            circuit,
            clock.clone(),
            stats.clone(),
        ));
        let sweeper = Arc::new(RecoverySweeper::new(
            storage.clone(),
            dyn_scheduler.clone(),
            clock.clone(),
            config.sweep_config.clone(),
            cancellation_token.clone(),
        ));

        Ok(Self {
            dispatcher: Dispatcher::new(storage.clone(), dyn_scheduler, clock.clone()),
            registry: SubscriptionRegistry::new(storage.clone(), clock, config.require_https),
            history: DeliveryHistory::new(storage.clone()),
            config,
            storage,
            retry,
            executor,
            sweeper,
            tracker,
            stats,
            cancellation_token,
            queue: Mutex::new(Some(queue)),
            worker_pool: Mutex::new(None),
            sweeper_handle: Mutex::new(None),
        })
    }

    /// Spawns the worker pool and the recovery sweeper.
    ///
    /// The sweeper's first pass runs immediately, picking up deliveries
    /// left pending by a previous process.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the engine was already started.
    pub async fn start(&self) -> Result<()> {
        let Some(queue) = self.queue.lock().await.take() else {
            return Err(DeliveryError::configuration("engine already started"));
        };

        info!(
            worker_count = self.config.worker_count,
            max_attempts = self.config.retry_policy.max_attempts,
            failure_threshold = self.config.circuit_config.failure_threshold,
            "starting webhook engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.config.worker_count,
            queue,
            self.executor.clone(),
            self.tracker.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker_pool.spawn_workers().await?;
        *self.worker_pool.lock().await = Some(worker_pool);

        let sweeper = self.sweeper.clone();
        *self.sweeper_handle.lock().await = Some(tokio::spawn(async move { sweeper.run().await }));

        info!("webhook engine started successfully");
        Ok(())
    }

    /// Gracefully shuts down the engine.
    ///
    /// Pending timers are dropped; their deliveries stay pending in storage
    /// and are picked up by the next process's sweep. In-flight attempts
    /// finish within the configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` or `WorkerPanic` from the worker pool.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down webhook engine");
        self.cancellation_token.cancel();

        if let Some(handle) = self.sweeper_handle.lock().await.take() {
            match handle.await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(error = %e, "recovery sweeper stopped with error"),
                Err(e) => error!(error = %e, "recovery sweeper task panicked"),
            }
        }

        let worker_pool = self.worker_pool.lock().await.take();
        match worker_pool {
            Some(worker_pool) => worker_pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                info!("webhook engine was not started, shutdown completed immediately");
                Ok(())
            },
        }
    }

    /// Subscription administration.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Delivery history queries.
    pub fn history(&self) -> &DeliveryHistory {
        &self.history
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Fans an event out to matching subscriptions. Never fails; returns
    /// how many deliveries were created.
    pub async fn enqueue_event(&self, event_type: EventType, payload: serde_json::Value) -> usize {
        self.dispatcher.enqueue_event(event_type, payload).await
    }

    /// Sends a `test` event to one subscription.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn test_webhook(&self, subscription_id: SubscriptionId) -> Result<DeliveryId> {
        self.dispatcher.test_webhook(subscription_id).await
    }

    /// Re-opens and schedules every failed delivery of a subscription.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionNotFound` or a storage error.
    pub async fn retry_failed_deliveries(&self, subscription_id: SubscriptionId) -> Result<usize> {
        self.retry.retry_failed_deliveries(subscription_id).await
    }

    /// Re-opens and schedules one failed delivery.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryNotFound`, a validation error if it is not failed,
    /// or a storage error.
    pub async fn retry_delivery(&self, delivery_id: DeliveryId) -> Result<()> {
        self.retry.retry_delivery(delivery_id).await
    }

    /// Runs one recovery sweep now.
    ///
    /// # Errors
    ///
    /// Returns a storage error if due deliveries cannot be loaded.
    pub async fn sweep_once(&self) -> Result<usize> {
        self.sweeper.sweep_once().await
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Number of scheduled or queued jobs not yet finished.
    pub fn outstanding_jobs(&self) -> usize {
        self.tracker.len()
    }

    /// Whether the engine is shutting down or stopped.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Checks that storage is reachable.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn health_check(&self) -> Result<()> {
        Ok(self.storage.health_check().await?)
    }
}
