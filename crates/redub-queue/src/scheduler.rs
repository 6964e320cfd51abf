//! FIFO scheduler: one job at a time, fresh run state per job.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use redub_models::{CancelToken, Job, JobId, ProgressSnapshot, SharedRunState};

use crate::error::QueueError;

/// How a job ended, as reported by its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Runs one job end to end.
///
/// Handlers report failures through [`JobOutcome`]; the scheduler only has to
/// survive panics, for which it calls [`JobHandler::on_crash`].
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job, state: SharedRunState) -> JobOutcome;

    /// Last-resort notification when `handle` panicked.
    async fn on_crash(&self, _job: &Job, _reason: &str) {}
}

/// Point-in-time view for status commands.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub queued: usize,
    pub current: Option<JobId>,
    pub progress: Option<ProgressSnapshot>,
}

struct Live {
    job_id: JobId,
    state: SharedRunState,
}

struct Inner {
    queue: Mutex<VecDeque<Job>>,
    live: Mutex<Option<Live>>,
    processing: AtomicBool,
    wakeup: Notify,
}

/// Owned replacement for a global queue plus flags.
///
/// Lock order is always `queue` then `live`.
#[derive(Clone)]
pub struct PipelineScheduler {
    inner: Arc<Inner>,
}

impl Default for PipelineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means a holder panicked; the data is still usable.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PipelineScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                live: Mutex::new(None),
                processing: AtomicBool::new(false),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Append a job to the tail. Never blocks; returns its 1-based position.
    pub fn enqueue(&self, job: Job) -> usize {
        let position = {
            let mut queue = lock(&self.inner.queue);
            queue.push_back(job);
            queue.len()
        };
        self.inner.wakeup.notify_one();
        position
    }

    /// Drain the queue and cancel the live job, if any.
    ///
    /// Returns the number of queued jobs discarded.
    pub fn cancel_all(&self) -> usize {
        let mut queue = lock(&self.inner.queue);
        let discarded = queue.len();
        queue.clear();

        let live = lock(&self.inner.live);
        if let Some(live) = live.as_ref() {
            info!(job_id = %live.job_id, "Cancelling in-flight job");
            live.state.cancel();
        }

        info!(discarded, "Queue cleared");
        discarded
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn status(&self) -> SchedulerStatus {
        let queued = self.queue_len();
        let live = lock(&self.inner.live);
        SchedulerStatus {
            queued,
            current: live.as_ref().map(|l| l.job_id.clone()),
            progress: live.as_ref().map(|l| l.state.snapshot()),
        }
    }

    /// Pop the head and bind a fresh run state under one lock, so
    /// `cancel_all` either sees the job queued or sees it live.
    fn take_next(&self) -> Option<(Job, SharedRunState)> {
        let mut queue = lock(&self.inner.queue);
        let job = queue.pop_front()?;
        let state = SharedRunState::new();
        *lock(&self.inner.live) = Some(Live {
            job_id: job.id.clone(),
            state: state.clone(),
        });
        self.inner.processing.store(true, Ordering::SeqCst);
        Some((job, state))
    }

    fn release(&self) {
        *lock(&self.inner.live) = None;
        self.inner.processing.store(false, Ordering::SeqCst);
    }

    /// Consume jobs forever.
    pub async fn run_forever(&self, handler: Arc<dyn JobHandler>) {
        self.run_until(handler, CancelToken::new()).await
    }

    /// Consume jobs until `shutdown` is raised. A job in flight at shutdown
    /// is left to observe its own cancellation.
    pub async fn run_until(&self, handler: Arc<dyn JobHandler>, shutdown: CancelToken) {
        info!("Pipeline scheduler started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let Some((job, state)) = self.take_next() else {
                tokio::select! {
                    _ = self.inner.wakeup.notified() => {}
                    _ = shutdown.cancelled() => {}
                }
                continue;
            };

            let job_id = job.id.clone();
            info!(job_id = %job_id, remaining = self.queue_len(), "Dequeued job");

            let task_handler = Arc::clone(&handler);
            let task_job = job.clone();
            let result = tokio::spawn(async move { task_handler.handle(task_job, state).await }).await;

            match result.map_err(QueueError::from_join) {
                Ok(JobOutcome::Completed) => info!(job_id = %job_id, "Job completed"),
                Ok(JobOutcome::Cancelled) => info!(job_id = %job_id, "Job cancelled"),
                Ok(JobOutcome::Failed(reason)) => warn!(job_id = %job_id, %reason, "Job failed"),
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Job handler crashed");
                    handler.on_crash(&job, &e.to_string()).await;
                }
            }

            self.release();
        }

        info!("Pipeline scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redub_models::VideoSource;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn job(name: &str) -> Job {
        Job::new(
            name,
            VideoSource::InboundMedia(format!("{name}-media")),
            format!("/tmp/{name}.json"),
            format!("{name}.mp4"),
        )
    }

    /// Reports every job it sees, optionally blocking until cancelled.
    struct Recorder {
        seen: mpsc::UnboundedSender<(String, bool)>,
        block_until_cancelled: bool,
        panic_on: Option<String>,
        crashes: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: Job, state: SharedRunState) -> JobOutcome {
            if self.panic_on.as_deref() == Some(job.submitter.as_str()) {
                panic!("boom in {}", job.submitter);
            }
            let fresh = !state.is_cancelled() && state.snapshot() == ProgressSnapshot::default();
            state.set_status("working");
            let _ = self.seen.send((job.submitter.clone(), fresh));
            if self.block_until_cancelled {
                state.cancel_token().cancelled().await;
                return JobOutcome::Cancelled;
            }
            JobOutcome::Completed
        }

        async fn on_crash(&self, job: &Job, _reason: &str) {
            let _ = self.crashes.send(job.submitter.clone());
        }
    }

    fn recorder(
        block: bool,
        panic_on: Option<&str>,
    ) -> (
        Arc<dyn JobHandler>,
        mpsc::UnboundedReceiver<(String, bool)>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (seen, seen_rx) = mpsc::unbounded_channel();
        let (crashes, crash_rx) = mpsc::unbounded_channel();
        let handler = Recorder {
            seen,
            block_until_cancelled: block,
            panic_on: panic_on.map(str::to_string),
            crashes,
        };
        (Arc::new(handler), seen_rx, crash_rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for handler")
            .expect("channel closed")
    }

    #[test]
    fn test_enqueue_positions() {
        let scheduler = PipelineScheduler::new();
        assert_eq!(scheduler.enqueue(job("a")), 1);
        assert_eq!(scheduler.enqueue(job("b")), 2);
        assert_eq!(scheduler.queue_len(), 2);
        assert!(!scheduler.is_processing());
    }

    #[tokio::test]
    async fn test_jobs_run_in_fifo_order_with_fresh_state() {
        let scheduler = PipelineScheduler::new();
        let (handler, mut seen, _) = recorder(false, None);
        for name in ["a", "b", "c"] {
            scheduler.enqueue(job(name));
        }

        let shutdown = CancelToken::new();
        let runner = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run_until(handler, shutdown).await })
        };

        for expected in ["a", "b", "c"] {
            let (name, fresh) = next(&mut seen).await;
            assert_eq!(name, expected);
            assert!(fresh, "job {name} saw a reused run state");
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_work_when_empty() {
        let scheduler = PipelineScheduler::new();
        let (handler, mut seen, _) = recorder(false, None);
        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_forever(handler).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.enqueue(job("late"));
        assert_eq!(next(&mut seen).await.0, "late");
        runner.abort();
    }

    #[tokio::test]
    async fn test_cancel_all_drains_and_stops_live_job() {
        let scheduler = PipelineScheduler::new();
        let (handler, mut seen, _) = recorder(true, None);
        scheduler.enqueue(job("live"));
        scheduler.enqueue(job("queued-1"));
        scheduler.enqueue(job("queued-2"));

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_forever(handler).await })
        };

        assert_eq!(next(&mut seen).await.0, "live");
        assert!(scheduler.is_processing());
        let status = scheduler.status();
        assert_eq!(status.queued, 2);
        assert_eq!(status.progress.unwrap().status_text, "working");

        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.queue_len(), 0);

        // The live job unblocks and the loop goes idle without running the rest.
        tokio::time::timeout(Duration::from_secs(2), async {
            while scheduler.is_processing() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(seen.try_recv().is_err());
        assert!(scheduler.status().current.is_none());

        runner.abort();
    }

    #[tokio::test]
    async fn test_cancel_all_when_idle() {
        let scheduler = PipelineScheduler::new();
        assert_eq!(scheduler.cancel_all(), 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_loop() {
        let scheduler = PipelineScheduler::new();
        let (handler, mut seen, mut crashes) = recorder(false, Some("bad"));
        scheduler.enqueue(job("bad"));
        scheduler.enqueue(job("good"));

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_forever(handler).await })
        };

        assert_eq!(next(&mut crashes).await, "bad");
        assert_eq!(next(&mut seen).await.0, "good");
        runner.abort();
    }
}
