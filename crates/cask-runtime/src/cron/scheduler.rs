use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cask_core::cron::{TaskDefinition, TaskRun};
use cask_core::monitor::{CheckInStatus, ErrorContext, ErrorReporter, MonitoringSink};
use cask_core::{CaskError, Clock, Result, SystemClock};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::guard::{OverrunGuard, RunGuard};
use super::registry::TaskRegistry;
use crate::panic::panic_message;

/// Shortest tick the loop will run with; `tokio::time::interval` rejects zero.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the cron scheduler.
#[derive(Debug, Clone)]
pub struct CronSchedulerConfig {
    /// How often to check for due tasks.
    pub tick_interval: Duration,
}

impl Default for CronSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Collaborators shared by the tick loop and every task run.
struct Shared {
    monitor: Arc<dyn MonitoringSink>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
}

/// Cron scheduler.
///
/// Tasks are added before [`CronScheduler::start`]; starting consumes the
/// scheduler so the task set is fixed for the lifetime of the tick loop.
pub struct CronScheduler {
    registry: TaskRegistry,
    config: CronSchedulerConfig,
    shared: Arc<Shared>,
}

impl CronScheduler {
    /// Create a new cron scheduler.
    pub fn new(
        mut config: CronSchedulerConfig,
        monitor: Arc<dyn MonitoringSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        if config.tick_interval < MIN_TICK_INTERVAL {
            tracing::warn!(
                tick_interval_ms = config.tick_interval.as_millis() as u64,
                "Tick interval too small, using 1ms"
            );
            config.tick_interval = MIN_TICK_INTERVAL;
        }
        Self {
            registry: TaskRegistry::new(),
            config,
            shared: Arc::new(Shared {
                monitor,
                reporter,
                clock: Arc::new(SystemClock),
            }),
        }
    }

    /// Replace the clock used to evaluate schedules.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.shared = Arc::new(Shared {
            monitor: self.shared.monitor.clone(),
            reporter: self.shared.reporter.clone(),
            clock,
        });
        self
    }

    /// Add a recurring task.
    pub fn add_task<F, Fut>(
        &mut self,
        name: impl Into<String>,
        cron_expression: &str,
        prevent_overrun: bool,
        callback: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task = TaskDefinition::new(name, cron_expression, prevent_overrun, callback)?;
        self.add(task)
    }

    /// Add a prepared task definition.
    pub fn add(&mut self, task: TaskDefinition) -> Result<()> {
        tracing::debug!(
            task = task.name(),
            schedule = task.schedule().expression(),
            prevent_overrun = task.prevent_overrun(),
            "Task registered"
        );
        self.registry.register(task)
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Spawn the tick loop.
    pub fn start(self) -> SchedulerHandle {
        let shutdown = CancellationToken::new();
        let runs = TaskTracker::new();

        let tick_loop = TickLoop {
            tasks: self
                .registry
                .tasks()
                .iter()
                .cloned()
                .map(ScheduledTask::new)
                .collect(),
            tick_interval: self.config.tick_interval,
            shared: self.shared,
            shutdown: shutdown.clone(),
            runs: runs.clone(),
        };

        tracing::info!(
            tasks = tick_loop.tasks.len(),
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            "Cron scheduler starting"
        );

        let join = tokio::spawn(tick_loop.run());

        SchedulerHandle {
            shutdown,
            runs,
            join,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    runs: TaskTracker,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop firing new runs. In-flight runs keep going.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of task runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    /// Stop the tick loop and wait up to `grace` for in-flight runs.
    ///
    /// Returns `true` if every run finished within the grace period.
    pub async fn drain(self, grace: Duration) -> bool {
        self.stop();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Cron tick loop terminated abnormally");
        }

        self.runs.close();
        match tokio::time::timeout(grace, self.runs.wait()).await {
            Ok(()) => {
                tracing::info!("Cron scheduler drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.runs.len(),
                    "Drain timeout reached with task runs still in flight"
                );
                false
            }
        }
    }
}

/// Per-task scheduling state owned by the tick loop.
struct ScheduledTask {
    definition: TaskDefinition,
    next_due: Option<DateTime<Utc>>,
    guard: OverrunGuard,
}

impl ScheduledTask {
    fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            next_due: None,
            guard: OverrunGuard::new(),
        }
    }
}

struct TickLoop {
    tasks: Vec<ScheduledTask>,
    tick_interval: Duration,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    runs: TaskTracker,
}

impl TickLoop {
    async fn run(mut self) {
        let started = self.shared.clock.now();
        for task in &mut self.tasks {
            task.next_due = task.definition.next_fire_after(started);
            if task.next_due.is_none() {
                tracing::warn!(task = task.definition.name(), "Task has no upcoming fire time");
            }
        }

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.tick(self.shared.clock.now());
        }

        tracing::info!("Cron scheduler stopped");
    }

    /// Fire every task whose due time has passed, in registration order.
    fn tick(&mut self, now: DateTime<Utc>) {
        for task in &mut self.tasks {
            let Some(due) = task.next_due else {
                continue;
            };
            if due > now {
                continue;
            }

            // Due times missed within one tick collapse into this fire.
            task.next_due = task.definition.next_fire_after(now);

            let guard = if task.definition.prevent_overrun() {
                match task.guard.try_acquire() {
                    Some(guard) => Some(guard),
                    None => {
                        tracing::info!(
                            task = task.definition.name(),
                            scheduled_time = %due,
                            "Skipping fire, previous run still in progress"
                        );
                        continue;
                    }
                }
            } else {
                None
            };

            let run = TaskRun::new(task.definition.name(), due);
            self.runs.spawn(execute_run(
                task.definition.clone(),
                run,
                guard,
                self.shared.clone(),
            ));
        }
    }
}

/// Execute one fire of a task, reporting check-ins around the callback.
async fn execute_run(
    task: TaskDefinition,
    mut run: TaskRun,
    _guard: Option<RunGuard>,
    shared: Arc<Shared>,
) {
    let slug = task.name();
    let check_in = shared
        .monitor
        .begin_check_in(slug, task.schedule().expression());
    run.start(check_in, shared.clock.now());

    tracing::info!(
        task = slug,
        run_id = %run.id,
        scheduled_time = %run.scheduled_time,
        "Running task"
    );

    let outcome = AssertUnwindSafe(task.invoke()).catch_unwind().await;
    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(CaskError::HandlerExecution(format!(
            "task panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    match result {
        Ok(()) => {
            run.succeed(shared.clock.now());
            tracing::info!(task = slug, run_id = %run.id, "Task completed successfully");
            shared
                .monitor
                .complete_check_in(check_in, slug, CheckInStatus::Ok);
        }
        Err(e) => {
            run.fail(shared.clock.now(), e.to_string());
            tracing::error!(task = slug, run_id = %run.id, error = %e, "Task failed");
            shared
                .reporter
                .capture_exception(&e, &ErrorContext::task(slug, run.id));
            shared
                .monitor
                .complete_check_in(check_in, slug, CheckInStatus::Error);
        }
    }
}
