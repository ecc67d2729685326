//! Outbound webhook delivery with signing, retries and circuit breaking.
//!
//! Domain events fan out to every active subscription that listens to them.
//! Each match becomes a persisted delivery whose attempts run in the
//! background, so producers never wait on or see a receiver.
//!
//! # Lifecycle
//!
//! 1. **Fan-out** - [`Dispatcher`] creates one pending delivery per matching
//!    subscription and schedules its first attempt
//! 2. **Attempt** - [`DeliveryExecutor`] signs the envelope with the
//!    subscription secret and POSTs it
//! 3. **Retry** - [`RetryScheduler`] arms the next attempt from the backoff
//!    table or marks the delivery failed
//! 4. **Circuit** - [`CircuitBreaker`] disables a subscription after too many
//!    permanently failed deliveries in a row
//!
//! Timers live in memory. [`RecoverySweeper`] re-schedules pending
//! deliveries that lost theirs to a restart.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookrelay_core::{EventType, RealClock};
//! use hookrelay_delivery::{DeliveryConfig, DeliveryError, WebhookEngine, WebhookStorage};
//!
//! # async fn example(storage: Arc<dyn WebhookStorage>) -> Result<(), DeliveryError> {
//! let engine = WebhookEngine::new(storage, DeliveryConfig::default(), Arc::new(RealClock::new()))?;
//! engine.start().await?;
//!
//! let created = engine
//!     .enqueue_event(EventType::DealWon, serde_json::json!({ "deal_id": 42 }))
//!     .await;
//! println!("created {created} deliveries");
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod signing;
pub mod storage;
pub mod sweep;
pub mod validation;
mod worker_pool;

pub use circuit::{CircuitBreaker, CircuitConfig};
pub use client::{ClientConfig, DeliveryClient};
pub use dispatcher::Dispatcher;
pub use engine::{DeliveryConfig, EngineStats, WebhookEngine};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use executor::{DeliveryExecutor, ExecutionOutcome};
pub use history::{DeliveryDetail, DeliveryHistory};
pub use registry::{CreatedSubscription, NewSubscription, SubscriptionRegistry};
pub use retry::{RetryPolicy, RetryScheduler};
pub use scheduler::{Job, JobTracker, ManualScheduler, Scheduler, TokioScheduler};
pub use storage::{PostgresWebhookStorage, WebhookStorage};
pub use sweep::{RecoverySweeper, SweepConfig};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;
