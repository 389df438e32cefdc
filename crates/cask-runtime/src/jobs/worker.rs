use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cask_core::job::{CaskJob, JobContext, QueueClient};
use cask_core::monitor::ErrorReporter;
use cask_core::Result;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::executor::{ExecutionResult, JobExecutor};
use super::registry::JobRegistry;

/// Pause before leasing again after the queue returned an error.
const LEASE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID (auto-generated if not provided).
    pub id: Option<Uuid>,
    /// Maximum concurrent jobs.
    pub concurrency: usize,
    /// How long one lease call waits for a job.
    pub lease_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            concurrency: 10,
            lease_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&cask_core::config::WorkerConfig> for WorkerConfig {
    fn from(config: &cask_core::config::WorkerConfig) -> Self {
        Self {
            id: None,
            concurrency: config.concurrency,
            lease_timeout: Duration::from_millis(config.lease_timeout_ms),
        }
    }
}

/// Pool of job workers draining one queue.
///
/// Handlers are registered through `&mut self` before [`WorkerPool::run`],
/// which only needs `&self`, so a running pool cannot gain handlers.
pub struct WorkerPool {
    id: Uuid,
    config: WorkerConfig,
    queue: Arc<dyn QueueClient>,
    registry: JobRegistry,
    reporter: Arc<dyn ErrorReporter>,
    shutdown: CancellationToken,
    jobs: TaskTracker,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn QueueClient>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let id = config.id.unwrap_or_else(Uuid::new_v4);
        Self {
            id,
            config,
            queue,
            registry: JobRegistry::new(),
            reporter,
            shutdown: CancellationToken::new(),
            jobs: TaskTracker::new(),
        }
    }

    /// Replace the handler registry.
    pub fn with_registry(mut self, registry: JobRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a handler for a job type.
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry.register(job_type, handler)
    }

    /// Register a typed job.
    pub fn register_job<J: CaskJob>(&mut self) -> Result<()> {
        self.registry.register_job::<J>()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Get worker ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn executor(&self) -> JobExecutor {
        JobExecutor::new(
            self.queue.clone(),
            Arc::new(self.registry.clone()),
            self.reporter.clone(),
            self.id,
        )
    }

    /// Lease and execute a single job inline.
    ///
    /// Returns `Ok(None)` when no job arrived within the lease timeout.
    pub async fn run_once(&self) -> Result<Option<ExecutionResult>> {
        let Some(lease) = self.queue.lease(self.config.lease_timeout).await? else {
            return Ok(None);
        };

        let job_id = lease.job_id();
        let job_type = lease.job.job_type.clone();
        let result = self.executor().execute(lease).await;
        log_outcome(&result, job_id, &job_type);
        Ok(Some(result))
    }

    /// Run the pool until [`WorkerPool::stop`] is called.
    pub async fn run(&self) -> Result<()> {
        let executor = Arc::new(self.executor());
        let slots = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        tracing::info!(
            worker_id = %self.id,
            concurrency = self.config.concurrency,
            job_types = ?self.registry.job_types(),
            "Worker pool started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let leased = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                leased = self.queue.lease(self.config.lease_timeout) => leased,
            };

            match leased {
                Ok(Some(lease)) => {
                    let executor = executor.clone();
                    let job_id = lease.job_id();
                    let job_type = lease.job.job_type.clone();

                    self.jobs.spawn(async move {
                        tracing::debug!(job_id = %job_id, job_type = %job_type, "Processing job");
                        let result = executor.execute(lease).await;
                        log_outcome(&result, job_id, &job_type);
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Failed to lease job");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(LEASE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker pool shutting down");
        Ok(())
    }

    /// Stop leasing new jobs. Jobs already running keep going.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled by [`WorkerPool::stop`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of jobs currently executing.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// Stop and wait up to `grace` for running jobs.
    ///
    /// Returns `true` if every job finished within the grace period. Jobs
    /// still running afterwards are not cancelled; their leases expire and
    /// the queue redelivers them.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.stop();
        self.jobs.close();

        match tokio::time::timeout(grace, self.jobs.wait()).await {
            Ok(()) => {
                tracing::info!(worker_id = %self.id, "Worker pool drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = %self.id,
                    remaining = self.jobs.len(),
                    "Drain timeout reached with jobs still in flight"
                );
                false
            }
        }
    }
}

fn log_outcome(result: &ExecutionResult, job_id: Uuid, job_type: &str) {
    match result {
        ExecutionResult::Completed => {
            tracing::info!(job_id = %job_id, job_type = job_type, "Job completed");
        }
        ExecutionResult::Failed { error, retryable } => {
            tracing::warn!(
                job_id = %job_id,
                job_type = job_type,
                error = %error,
                retryable = retryable,
                "Job failed"
            );
        }
        ExecutionResult::Unregistered { .. } => {
            tracing::error!(
                job_id = %job_id,
                job_type = job_type,
                "Job failed permanently: no handler registered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Dispatcher, MemoryQueue};
    use crate::testing::RecordingErrorReporter;
    use cask_core::CaskError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Fixture {
        queue: Arc<MemoryQueue>,
        dispatcher: Dispatcher,
        reporter: Arc<RecordingErrorReporter>,
        pool: WorkerPool,
    }

    fn fixture(concurrency: usize) -> Fixture {
        let queue = Arc::new(MemoryQueue::default());
        let reporter = Arc::new(RecordingErrorReporter::new());
        let pool = WorkerPool::new(
            WorkerConfig {
                concurrency,
                lease_timeout: Duration::from_millis(100),
                ..Default::default()
            },
            queue.clone(),
            reporter.clone(),
        );
        Fixture {
            dispatcher: Dispatcher::new(queue.clone()),
            queue,
            reporter,
            pool,
        }
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.id.is_none());
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.lease_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_worker_config_from_settings() {
        let settings = cask_core::config::WorkerConfig {
            concurrency: 4,
            lease_timeout_ms: 250,
            ..Default::default()
        };
        let config = WorkerConfig::from(&settings);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.lease_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let mut f = fixture(1);
        f.pool.register("SendEmail", |_, _| async { Ok(()) }).unwrap();
        let result = f.pool.register("SendEmail", |_, _| async { Ok(()) });
        assert!(matches!(result, Err(CaskError::DuplicateRegistration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_empty_queue() {
        let f = fixture(1);
        assert!(f.pool.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_then_one_cycle_invokes_handler_once() {
        let mut f = fixture(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            f.pool
                .register("SendEmail", move |_, payload| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(payload);
                        Ok(())
                    }
                })
                .unwrap();
        }

        f.dispatcher
            .enqueue("SendEmail", serde_json::json!({"to": "a@b.com"}))
            .await
            .unwrap();

        let result = f.pool.run_once().await.unwrap().unwrap();
        assert!(result.is_success());
        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!({"to": "a@b.com"})]);
        assert_eq!(f.queue.stats().await.unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_job_is_not_retried() {
        let f = fixture(1);
        f.dispatcher
            .enqueue("SendEmail", serde_json::json!({"to": "a@b.com"}))
            .await
            .unwrap();

        let result = f.pool.run_once().await.unwrap().unwrap();
        assert_eq!(
            result,
            ExecutionResult::Unregistered {
                job_type: "SendEmail".into()
            }
        );

        let dead = f.queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 1);
        assert_eq!(f.queue.stats().await.unwrap().outstanding(), 0);
        assert!(f.reporter.captured()[0].unregistered_handler);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_later_jobs() {
        let mut f = fixture(1);
        let ran = Arc::new(AtomicUsize::new(0));
        f.pool
            .register("ScrapeTotalWine", |_, _| async {
                Err(CaskError::HandlerExecution("upstream 500".into()))
            })
            .unwrap();
        {
            let ran = ran.clone();
            f.pool
                .register("NotifyDiscordOnTasting", move |_, _| {
                    let ran = ran.clone();
                    async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        f.dispatcher
            .enqueue("ScrapeTotalWine", serde_json::json!({}))
            .await
            .unwrap();
        f.dispatcher
            .enqueue("NotifyDiscordOnTasting", serde_json::json!({"tasting": 7}))
            .await
            .unwrap();

        let first = f.pool.run_once().await.unwrap().unwrap();
        let second = f.pool.run_once().await.unwrap().unwrap();

        assert!(first.should_retry());
        assert!(second.is_success());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(f.reporter.len(), 1);
        assert_eq!(
            f.reporter.captured()[0].context.get("job_type"),
            Some("ScrapeTotalWine")
        );
        assert_eq!(f.queue.stats().await.unwrap().delayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_respects_concurrency_limit() {
        let mut f = fixture(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        {
            let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
            f.pool
                .register("slow", move |_, _| {
                    let (active, peak, done) = (active.clone(), peak.clone(), done.clone());
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }

        for _ in 0..5 {
            f.dispatcher.enqueue("slow", serde_json::json!({})).await.unwrap();
        }

        let pool = Arc::new(f.pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        pool.stop();
        runner.await.unwrap().unwrap();
        assert!(pool.drain(Duration::from_secs(5)).await);

        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_running_job() {
        let mut f = fixture(4);
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let finished = finished.clone();
            f.pool
                .register("slow", move |_, _| {
                    let finished = finished.clone();
                    async move {
                        tokio::time::sleep(Duration::from_secs(3)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }
        f.dispatcher.enqueue("slow", serde_json::json!({})).await.unwrap();

        let pool = Arc::new(f.pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pool.in_flight(), 1);

        pool.stop();
        runner.await.unwrap().unwrap();
        assert!(pool.drain(Duration::from_secs(10)).await);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(f.queue.stats().await.unwrap().outstanding(), 0);
    }
}
