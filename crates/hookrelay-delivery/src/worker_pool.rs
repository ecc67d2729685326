//! Worker pool management with structured concurrency.
//!
//! Workers share the scheduler's job queue. Each takes one job at a time,
//! runs the executor and releases the job in the tracker, until the
//! cancellation token fires.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::EngineStats,
    error::{DeliveryError, Result},
    executor::DeliveryExecutor,
    scheduler::{Job, JobTracker},
};

/// Shared receiving end of the job queue.
pub type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Worker pool that manages delivery worker tasks with supervision.
pub struct WorkerPool {
    worker_count: usize,
    queue: JobQueue,
    executor: Arc<DeliveryExecutor>,
    tracker: JobTracker,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Create a new worker pool draining `queue`.
    pub fn new(
        worker_count: usize,
        queue: mpsc::UnboundedReceiver<Job>,
        executor: Arc<DeliveryExecutor>,
        tracker: JobTracker,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            worker_count,
            queue: Arc::new(Mutex::new(queue)),
            executor,
            tracker,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Spawn all configured workers and begin processing.
    ///
    /// Returns immediately after spawning all workers.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pool has no workers.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }

        info!(worker_count = self.worker_count, "spawning delivery workers");

        self.stats.write().await.active_workers = self.worker_count;

        for worker_id in 0..self.worker_count {
            let worker = DeliveryWorker {
                id: worker_id,
                queue: self.queue.clone(),
                executor: self.executor.clone(),
                tracker: self.tracker.clone(),
                cancellation_token: self.cancellation_token.clone(),
            };

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        Ok(())
    }

    /// Gracefully shutdown all workers, waiting for in-flight attempts to
    /// complete.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not stop in time, or
    /// `WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let shutdown_future = futures::future::join_all(handles);

        let results = match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(results) => results,
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                return Err(DeliveryError::ShutdownTimeout { timeout });
            },
        };

        self.stats.write().await.active_workers = 0;

        let mut first_panic = None;
        for (worker_id, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => {},
                Ok(Err(error)) => {
                    warn!(worker_id, error = %error, "worker completed with error during shutdown");
                },
                Err(join_error) => {
                    error!(worker_id, error = %join_error, "worker task panicked");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                },
            }
        }

        match first_panic {
            Some(error) => Err(error),
            None => {
                info!("worker pool shutdown completed");
                Ok(())
            },
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active_count,
                "worker pool dropped without shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}

/// One worker draining the shared queue.
struct DeliveryWorker {
    id: usize,
    queue: JobQueue,
    executor: Arc<DeliveryExecutor>,
    tracker: JobTracker,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Main worker loop - receives and runs jobs until cancelled.
    async fn run(&self) -> Result<()> {
        debug!(worker_id = self.id, "delivery worker starting");

        loop {
            let job = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                job = self.next_job() => job,
            };

            let Some(job) = job else {
                debug!(worker_id = self.id, "job queue closed");
                break;
            };

            self.process(job).await;
        }

        debug!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    async fn next_job(&self) -> Option<Job> {
        self.queue.lock().await.recv().await
    }

    async fn process(&self, job: Job) {
        match job {
            Job::AttemptDelivery(delivery_id) => {
                match self.executor.execute(delivery_id).await {
                    Ok(outcome) => {
                        debug!(
                            worker_id = self.id,
                            delivery_id = %delivery_id,
                            outcome = ?outcome,
                            "delivery job finished"
                        );
                    },
                    Err(error) => {
                        error!(
                            worker_id = self.id,
                            delivery_id = %delivery_id,
                            error = %error,
                            "delivery job failed, leaving it to the recovery sweep"
                        );
                    },
                }
            },
        }

        self.tracker.finish(&job);
    }
}
