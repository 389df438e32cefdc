pub mod cron;
pub mod jobs;
pub mod monitor;
mod panic;
pub mod testing;

pub use cron::{CronScheduler, CronSchedulerConfig, SchedulerHandle, TaskRegistry};
pub use jobs::{
    Dispatcher, ExecutionResult, JobExecutor, JobRegistry, MemoryQueue, PgQueue, WorkerConfig,
    WorkerPool,
};
pub use monitor::{TracingErrorReporter, TracingMonitor};
