mod guard;
mod registry;
mod scheduler;

pub use guard::{OverrunGuard, RunGuard};
pub use registry::TaskRegistry;
pub use scheduler::{CronScheduler, CronSchedulerConfig, SchedulerHandle};
