//! Deferred job scheduling.
//!
//! The executor and dispatcher only ever ask for "run this job now" or
//! "run this job at T". [`TokioScheduler`] implements that with one timer
//! task per job feeding an unbounded channel the worker pool drains.
//! [`ManualScheduler`] records requests so tests can step through time.
//!
//! Timers live in memory only. After a restart the recovery sweep finds
//! pending deliveries whose time has come and schedules them again.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookrelay_core::{Clock, DeliveryId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Unit of scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Run one attempt of a delivery.
    AttemptDelivery(DeliveryId),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptDelivery(id) => write!(f, "attempt-delivery:{id}"),
        }
    }
}

/// Accepts jobs to run immediately or at a point in time.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `job` once `delay` has elapsed.
    async fn run_after(&self, delay: Duration, job: Job) -> Result<()>;

    /// Runs `job` at `at`, or immediately if `at` has passed.
    async fn run_at(&self, at: DateTime<Utc>, job: Job) -> Result<()>;

    /// Returns true if `job` is scheduled or queued and has not finished.
    fn has_outstanding(&self, job: &Job) -> bool;
}

/// Counts scheduled-but-unfinished jobs.
///
/// Shared between the scheduler, which registers jobs, and the worker
/// pool, which finishes them after execution.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    outstanding: Arc<Mutex<HashMap<Job, usize>>>,
}

impl JobTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more outstanding instance of `job`.
    pub fn begin(&self, job: Job) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        *outstanding.entry(job).or_insert(0) += 1;
    }

    /// Releases one instance of `job`.
    pub fn finish(&self, job: &Job) {
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = outstanding.get_mut(job) {
            *count -= 1;
            if *count == 0 {
                outstanding.remove(job);
            }
        }
    }

    /// Returns true if at least one instance of `job` is outstanding.
    pub fn contains(&self, job: &Job) -> bool {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).contains_key(job)
    }

    /// Total outstanding instances.
    pub fn len(&self) -> usize {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).values().sum()
    }

    /// Returns true when nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scheduler backed by tokio tasks and the injected clock.
pub struct TokioScheduler {
    sender: mpsc::UnboundedSender<Job>,
    clock: Arc<dyn Clock>,
    tracker: JobTracker,
    cancellation_token: CancellationToken,
}

impl TokioScheduler {
    /// Creates a scheduler and the receiving end of its job queue.
    pub fn new(
        clock: Arc<dyn Clock>,
        tracker: JobTracker,
        cancellation_token: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender, clock, tracker, cancellation_token }, receiver)
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        self.tracker.begin(job);
        self.sender.send(job).map_err(|_| {
            self.tracker.finish(&job);
            DeliveryError::scheduling(format!("job queue closed, dropping {job}"))
        })
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("outstanding", &self.tracker.len())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn run_after(&self, delay: Duration, job: Job) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(DeliveryError::scheduling("scheduler is shut down"));
        }

        if delay.is_zero() {
            return self.enqueue(job);
        }

        self.tracker.begin(job);
        let sender = self.sender.clone();
        let clock = self.clock.clone();
        let tracker = self.tracker.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = clock.sleep(delay) => {
                    if sender.send(job).is_err() {
                        warn!(%job, "job queue closed before timer fired");
                        tracker.finish(&job);
                    }
                }
                () = token.cancelled() => {
                    debug!(%job, "dropping pending timer on shutdown");
                    tracker.finish(&job);
                }
            }
        });

        Ok(())
    }

    async fn run_at(&self, at: DateTime<Utc>, job: Job) -> Result<()> {
        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        self.run_after(delay, job).await
    }

    fn has_outstanding(&self, job: &Job) -> bool {
        self.tracker.contains(job)
    }
}

/// A job recorded by [`ManualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledJob {
    /// When the job becomes runnable.
    pub due_at: DateTime<Utc>,
    /// The job.
    pub job: Job,
}

/// Scheduler that only records requests.
///
/// Tests drain due jobs with [`ManualScheduler::due`] and run them
/// themselves, which makes every retry step observable.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: Arc<dyn Clock>,
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
}

impl ManualScheduler {
    /// Creates a scheduler reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, jobs: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Returns every recorded job, earliest first.
    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner).clone();
        jobs.sort_by_key(|j| j.due_at);
        jobs
    }

    /// Removes and returns jobs due at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut due, rest): (Vec<ScheduledJob>, Vec<ScheduledJob>) =
            jobs.drain(..).partition(|j| j.due_at <= now);
        *jobs = rest;
        due.sort_by_key(|j| j.due_at);
        due.into_iter().map(|j| j.job).collect()
    }

    /// Number of recorded jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no jobs are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, due_at: DateTime<Utc>, job: Job) {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).push(ScheduledJob { due_at, job });
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler").field("jobs", &self.len()).finish_non_exhaustive()
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    async fn run_after(&self, delay: Duration, job: Job) -> Result<()> {
        self.record(offset(self.clock.now(), delay), job);
        Ok(())
    }

    async fn run_at(&self, at: DateTime<Utc>, job: Job) -> Result<()> {
        self.record(at, job);
        Ok(())
    }

    fn has_outstanding(&self, job: &Job) -> bool {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).iter().any(|j| j.job == *job)
    }
}

/// Adds a std duration to a timestamp, saturating at the maximum.
pub(crate) fn offset(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use hookrelay_core::{RealClock, TestClock};

    use super::*;

    #[tokio::test]
    async fn immediate_jobs_are_queued_and_tracked() {
        let tracker = JobTracker::new();
        let (scheduler, mut receiver) =
            TokioScheduler::new(Arc::new(RealClock::new()), tracker.clone(), CancellationToken::new());
        let job = Job::AttemptDelivery(DeliveryId::new());

        scheduler.run_after(Duration::ZERO, job).await.unwrap();

        assert!(scheduler.has_outstanding(&job));
        assert_eq!(receiver.recv().await, Some(job));

        tracker.finish(&job);
        assert!(!scheduler.has_outstanding(&job));
    }

    #[tokio::test]
    async fn delayed_job_fires_on_test_clock() {
        let clock = TestClock::new();
        let start = clock.now();
        let (scheduler, mut receiver) =
            TokioScheduler::new(Arc::new(clock.clone()), JobTracker::new(), CancellationToken::new());
        let job = Job::AttemptDelivery(DeliveryId::new());

        scheduler.run_after(Duration::from_secs(60), job).await.unwrap();

        assert_eq!(receiver.recv().await, Some(job));
        assert!(clock.now() - start >= chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn past_deadline_runs_now() {
        let clock = Arc::new(TestClock::new());
        let (scheduler, mut receiver) =
            TokioScheduler::new(clock.clone(), JobTracker::new(), CancellationToken::new());
        let job = Job::AttemptDelivery(DeliveryId::new());

        scheduler.run_at(clock.now() - chrono::Duration::minutes(5), job).await.unwrap();

        assert_eq!(receiver.try_recv().ok(), Some(job));
    }

    #[tokio::test]
    async fn cancelled_timers_release_jobs() {
        let tracker = JobTracker::new();
        let token = CancellationToken::new();
        let (scheduler, _receiver) =
            TokioScheduler::new(Arc::new(RealClock::new()), tracker.clone(), token.clone());
        let job = Job::AttemptDelivery(DeliveryId::new());

        scheduler.run_after(Duration::from_secs(3600), job).await.unwrap();
        assert!(tracker.contains(&job));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while tracker.contains(&job) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(scheduler.run_after(Duration::ZERO, job).await.is_err());
    }

    #[tokio::test]
    async fn manual_scheduler_releases_due_jobs_in_order() {
        let clock = TestClock::new();
        let scheduler = ManualScheduler::new(Arc::new(clock.clone()));
        let late = Job::AttemptDelivery(DeliveryId::new());
        let soon = Job::AttemptDelivery(DeliveryId::new());

        scheduler.run_after(Duration::from_secs(300), late).await.unwrap();
        scheduler.run_after(Duration::from_secs(60), soon).await.unwrap();

        assert!(scheduler.due(clock.now()).is_empty());
        assert!(scheduler.has_outstanding(&late));

        clock.advance(Duration::from_secs(60));
        assert_eq!(scheduler.due(clock.now()), vec![soon]);

        clock.advance(Duration::from_secs(240));
        assert_eq!(scheduler.due(clock.now()), vec![late]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn tracker_counts_duplicates() {
        let tracker = JobTracker::new();
        let job = Job::AttemptDelivery(DeliveryId::new());

        tracker.begin(job);
        tracker.begin(job);
        tracker.finish(&job);
        assert!(tracker.contains(&job));

        tracker.finish(&job);
        assert!(tracker.is_empty());
    }
}
