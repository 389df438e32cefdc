//! CASK process host.
//!
//! Wires configuration into a cron scheduler, a dispatcher and a worker pool
//! sharing one queue, then runs them until a shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use cask_core::config::{CaskConfig, QueueBackend, QueueConfig, TaskConfig};
use cask_core::cron::TaskDefinition;
use cask_core::error::{CaskError, Result};
use cask_core::job::{CaskJob, JobContext, QueueClient};
use cask_core::monitor::{ErrorReporter, MonitoringSink};

use cask_runtime::cron::{CronScheduler, CronSchedulerConfig};
use cask_runtime::jobs::{Dispatcher, JobRegistry, MemoryQueue, PgQueue, WorkerConfig, WorkerPool};
use cask_runtime::monitor::{TracingErrorReporter, TracingMonitor};

/// Prelude module for common imports.
pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use futures::future::BoxFuture;
    pub use serde_json::Value;

    pub use cask_core::config::CaskConfig;
    pub use cask_core::cron::TaskDefinition;
    pub use cask_core::error::{CaskError, Result};
    pub use cask_core::job::{CaskJob, JobContext, JobHandle};
    pub use cask_runtime::jobs::Dispatcher;

    pub use crate::{Cask, CaskBuilder};
}

/// Open the queue selected by the configuration.
///
/// The Postgres backend runs its table migration before returning.
pub async fn open_queue(config: &QueueConfig) -> Result<Arc<dyn QueueClient>> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::from_config(config))),
        QueueBackend::Postgres => {
            let queue = PgQueue::connect(config).await?;
            queue.migrate().await?;
            tracing::info!("Connected to postgres queue");
            Ok(Arc::new(queue))
        }
    }
}

/// The main CASK runtime.
pub struct Cask {
    config: CaskConfig,
    dispatcher: Dispatcher,
    scheduler: Option<CronScheduler>,
    pool: Option<WorkerPool>,
    shutdown: CancellationToken,
}

impl Cask {
    /// Create a new builder for configuring CASK.
    pub fn builder() -> CaskBuilder {
        CaskBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &CaskConfig {
        &self.config
    }

    /// Producer handle onto the runtime's queue.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Names of the tasks that will be scheduled, in registration order.
    pub fn task_names(&self) -> Vec<&str> {
        self.scheduler
            .as_ref()
            .map(|s| s.registry().names())
            .unwrap_or_default()
    }

    /// Token that stops [`Cask::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until SIGINT, SIGTERM or [`Cask::shutdown`].
    pub async fn run(self) -> Result<()> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::info!(
            project = %self.config.project.name,
            environment = %self.config.project.environment,
            hostname = %hostname,
            "CASK runtime starting"
        );

        let scheduler = self.scheduler.map(CronScheduler::start);

        let pool = self.pool.map(Arc::new);
        let worker = pool.as_ref().map(|pool| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        });

        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Received shutdown notification");
            }
        }

        tracing::info!("Starting graceful shutdown");

        if let Some(ref scheduler) = scheduler {
            scheduler.stop();
        }
        if let Some(ref pool) = pool {
            pool.stop();
        }

        if let Some(worker) = worker {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker pool error"),
                Err(e) => tracing::error!(error = %e, "Worker pool terminated abnormally"),
            }
        }

        let scheduler_grace = Duration::from_secs(self.config.scheduler.drain_timeout_secs);
        let worker_grace = Duration::from_secs(self.config.worker.drain_timeout_secs);

        let (tasks_drained, jobs_drained) = tokio::join!(
            async {
                match scheduler {
                    Some(scheduler) => scheduler.drain(scheduler_grace).await,
                    None => true,
                }
            },
            async {
                match pool {
                    Some(ref pool) => pool.drain(worker_grace).await,
                    None => true,
                }
            }
        );

        if tasks_drained && jobs_drained {
            tracing::info!("CASK runtime stopped");
        } else {
            tracing::warn!(
                tasks_drained,
                jobs_drained,
                "CASK runtime stopped with work still in flight"
            );
        }
        Ok(())
    }
}

/// Builder for configuring the CASK runtime.
///
/// Everything registered here is fixed once [`CaskBuilder::build`] returns.
pub struct CaskBuilder {
    config: Option<CaskConfig>,
    queue: Option<Arc<dyn QueueClient>>,
    job_registry: JobRegistry,
    tasks: Vec<TaskDefinition>,
    monitor: Arc<dyn MonitoringSink>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CaskBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            queue: None,
            job_registry: JobRegistry::new(),
            tasks: Vec::new(),
            monitor: Arc::new(TracingMonitor),
            reporter: Arc::new(TracingErrorReporter),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: CaskConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this queue instead of the one named in the configuration.
    pub fn queue(mut self, queue: Arc<dyn QueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn MonitoringSink>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Get mutable access to the job registry.
    pub fn job_registry_mut(&mut self) -> &mut JobRegistry {
        &mut self.job_registry
    }

    /// Register a handler for a job type.
    pub fn register<F, Fut>(&mut self, job_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.job_registry.register(job_type, handler)
    }

    /// Register a typed job.
    pub fn register_job<J: CaskJob>(&mut self) -> Result<()> {
        self.job_registry.register_job::<J>()
    }

    /// Add a programmatic task alongside the configured ones.
    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Build the CASK runtime.
    ///
    /// Opens the queue and registers every task; duplicate names and bad
    /// schedules fail here rather than at run time.
    pub async fn build(self) -> Result<Cask> {
        let config = self
            .config
            .ok_or_else(|| CaskError::Config("Configuration is required".to_string()))?;

        let queue = match self.queue {
            Some(queue) => queue,
            None => open_queue(&config.queue).await?,
        };
        let dispatcher = Dispatcher::new(queue.clone());

        let scheduler = if config.scheduler.enabled {
            let mut scheduler = CronScheduler::new(
                CronSchedulerConfig {
                    tick_interval: Duration::from_millis(config.scheduler.tick_interval_ms),
                },
                self.monitor,
                self.reporter.clone(),
            );

            for task in config.active_tasks() {
                scheduler.add(configured_task(task, &dispatcher)?)?;
            }
            for task in self.tasks {
                scheduler.add(task)?;
            }

            let skipped: Vec<&str> = config
                .tasks
                .iter()
                .filter(|t| !t.enabled_in(&config.project.environment))
                .map(|t| t.name.as_str())
                .collect();
            if !skipped.is_empty() {
                tracing::info!(
                    environment = %config.project.environment,
                    tasks = ?skipped,
                    "Tasks not registered in this environment"
                );
            }

            Some(scheduler)
        } else {
            None
        };

        let pool = if config.worker.enabled && self.job_registry.is_empty() {
            // A pool without handlers would dead-letter every job it leases,
            // including jobs meant for other workers on a shared queue.
            tracing::info!("No job handlers registered, worker pool not started");
            None
        } else if config.worker.enabled {
            let pool = WorkerPool::new(WorkerConfig::from(&config.worker), queue, self.reporter)
                .with_registry(self.job_registry);
            Some(pool)
        } else {
            None
        };

        Ok(Cask {
            config,
            dispatcher,
            scheduler,
            pool,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for CaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured task enqueues its job on every fire.
fn configured_task(task: &TaskConfig, dispatcher: &Dispatcher) -> Result<TaskDefinition> {
    let dispatcher = dispatcher.clone();
    let job_type = task.job_type.clone();
    let payload = task.payload.clone();

    TaskDefinition::new(
        task.name.clone(),
        &task.schedule,
        task.prevent_overrun,
        move || {
            let dispatcher = dispatcher.clone();
            let job_type = job_type.clone();
            let payload = payload.clone();
            async move { dispatcher.enqueue(&job_type, payload).await.map(|_| ()) }
        },
    )?
    .with_timezone(&task.timezone)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_runtime::testing::RecordingErrorReporter;

    fn memory_config(tasks: &str) -> CaskConfig {
        CaskConfig::parse_toml(&format!(
            r#"
            [project]
            name = "bottle-tracker"
            environment = "development"

            {tasks}
            "#
        ))
        .unwrap()
    }

    const TASKS: &str = r#"
        [[tasks]]
        name = "scrape-total-wine"
        schedule = "0 */2 * * *"
        job_type = "ScrapeTotalWine"
        payload = { region = "us" }
        environments = ["production"]

        [[tasks]]
        name = "ping"
        schedule = "* * * * *"
        job_type = "Ping"
    "#;

    #[tokio::test]
    async fn test_builder_requires_config() {
        let result = CaskBuilder::new().build().await;
        assert!(matches!(result, Err(CaskError::Config(_))));
    }

    #[tokio::test]
    async fn test_tasks_filtered_by_environment() {
        let cask = Cask::builder()
            .config(memory_config(TASKS))
            .build()
            .await
            .unwrap();
        assert_eq!(cask.task_names(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_programmatic_task_registered_after_configured() {
        let extra = TaskDefinition::new("nightly-report", "0 3 * * *", true, || async { Ok(()) })
            .unwrap();
        let cask = Cask::builder()
            .config(memory_config(TASKS))
            .task(extra)
            .build()
            .await
            .unwrap();
        assert_eq!(cask.task_names(), vec!["ping", "nightly-report"]);
    }

    #[tokio::test]
    async fn test_duplicate_task_name_fails_build() {
        let clash = TaskDefinition::new("ping", "*/5 * * * *", true, || async { Ok(()) }).unwrap();
        let result = Cask::builder()
            .config(memory_config(TASKS))
            .task(clash)
            .build()
            .await;
        assert!(matches!(result, Err(CaskError::DuplicateRegistration(_))));
    }

    #[tokio::test]
    async fn test_configured_task_enqueues_its_job() {
        let queue = Arc::new(MemoryQueue::default());
        let cask = Cask::builder()
            .config(memory_config(TASKS))
            .queue(queue.clone())
            .build()
            .await
            .unwrap();

        let task = cask
            .scheduler
            .as_ref()
            .and_then(|s| s.registry().get("ping"))
            .cloned()
            .unwrap();
        task.invoke().await.unwrap();

        let lease = queue.lease(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(lease.job.job_type, "Ping");
        assert_eq!(lease.job.payload, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_disabled_components_are_not_built() {
        let mut config = memory_config(TASKS);
        config.scheduler.enabled = false;
        config.worker.enabled = false;

        let cask = Cask::builder().config(config).build().await.unwrap();
        assert!(cask.scheduler.is_none());
        assert!(cask.pool.is_none());
        assert!(cask.task_names().is_empty());
    }

    #[tokio::test]
    async fn test_no_handlers_leaves_jobs_on_queue() {
        let queue = Arc::new(MemoryQueue::default());
        let mut config = memory_config("");
        config.scheduler.enabled = false;

        let cask = Cask::builder()
            .config(config)
            .queue(queue.clone())
            .build()
            .await
            .unwrap();
        assert!(cask.pool.is_none());

        cask.dispatcher()
            .enqueue("ScrapeTotalWine", serde_json::json!({}))
            .await
            .unwrap();

        let token = cask.shutdown_token();
        let running = tokio::spawn(cask.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        token.cancel();
        running.await.unwrap().unwrap();

        assert!(queue.dead_letters().is_empty());
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_run_processes_jobs_until_shutdown() {
        let (tx, rx) = tokio::sync::oneshot::channel::<Value>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let mut builder = Cask::builder()
            .config(memory_config(""))
            .error_reporter(Arc::new(RecordingErrorReporter::new()));
        builder
            .register("SendEmail", move |_, payload| {
                let tx = tx.clone();
                async move {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(payload);
                    }
                    Ok(())
                }
            })
            .unwrap();

        let cask = builder.build().await.unwrap();
        cask.dispatcher()
            .enqueue("SendEmail", serde_json::json!({"to": "a@b.com"}))
            .await
            .unwrap();

        let token = cask.shutdown_token();
        let running = tokio::spawn(cask.run());

        let payload = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, serde_json::json!({"to": "a@b.com"}));

        token.cancel();
        running.await.unwrap().unwrap();
    }
}
