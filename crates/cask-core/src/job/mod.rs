mod context;
mod queue;
mod record;
mod traits;

pub use context::JobContext;
pub use queue::{QueueClient, QueueStats};
pub use record::{Job, JobFailure, JobHandle, JobId, Lease};
pub use traits::{BackoffStrategy, CaskJob, RetryConfig};
