use std::time::Duration;

use futures::future::BoxFuture;

use super::record::{JobFailure, JobId, Lease};
use crate::error::Result;

/// A durable work queue.
///
/// All job state transitions go through these operations. Retry counts,
/// backoff and dead-lettering are the implementation's policy.
pub trait QueueClient: Send + Sync {
    /// Add a job and return its ID.
    fn enqueue<'a>(
        &'a self,
        job_type: &'a str,
        payload: serde_json::Value,
    ) -> BoxFuture<'a, Result<JobId>>;

    /// Wait up to `timeout` for a job. `None` means nothing became available.
    fn lease(&self, timeout: Duration) -> BoxFuture<'_, Result<Option<Lease>>>;

    /// Remove a successfully processed job.
    fn ack<'a>(&'a self, lease: &'a Lease) -> BoxFuture<'a, Result<()>>;

    /// Report a failed job; the queue requeues or dead-letters it.
    fn fail<'a>(&'a self, lease: &'a Lease, failure: JobFailure) -> BoxFuture<'a, Result<()>>;

    /// Current queue counts.
    fn stats(&self) -> BoxFuture<'_, Result<QueueStats>>;
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Ready to be leased.
    pub pending: u64,
    /// Waiting for a retry backoff to elapse.
    pub delayed: u64,
    /// Currently leased by a worker.
    pub leased: u64,
    pub dead_letter: u64,
}

impl QueueStats {
    /// Jobs that will still be delivered to a worker.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.delayed + self.leased
    }
}
