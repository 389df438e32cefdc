pub mod clock;
pub mod config;
pub mod cron;
pub mod error;
pub mod job;
pub mod monitor;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::CaskConfig;
pub use error::{CaskError, Result};
pub use job::{CaskJob, Job, JobContext, JobFailure, JobHandle, JobId, Lease, QueueClient};
pub use monitor::{CheckInId, CheckInStatus, ErrorContext, ErrorReporter, MonitoringSink};
