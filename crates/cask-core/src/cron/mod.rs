mod run;
mod schedule;
mod task;

pub use run::{RunStatus, TaskRun};
pub use schedule::{parse_timezone, CronSchedule};
pub use task::{TaskCallback, TaskDefinition};
