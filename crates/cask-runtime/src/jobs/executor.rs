use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cask_core::job::{JobContext, JobFailure, Lease, QueueClient};
use cask_core::monitor::{ErrorContext, ErrorReporter};
use cask_core::CaskError;
use futures::FutureExt;
use uuid::Uuid;

use super::registry::JobRegistry;
use crate::panic::panic_message;

/// Runs leased jobs through their handlers and settles the lease.
pub struct JobExecutor {
    queue: Arc<dyn QueueClient>,
    registry: Arc<JobRegistry>,
    reporter: Arc<dyn ErrorReporter>,
    worker_id: Uuid,
}

impl JobExecutor {
    /// Create a new job executor.
    pub fn new(
        queue: Arc<dyn QueueClient>,
        registry: Arc<JobRegistry>,
        reporter: Arc<dyn ErrorReporter>,
        worker_id: Uuid,
    ) -> Self {
        Self {
            queue,
            registry,
            reporter,
            worker_id,
        }
    }

    /// Execute a leased job.
    ///
    /// Handler errors and panics are contained here; the returned outcome is
    /// informational and the lease is always acked or failed before return.
    pub async fn execute(&self, lease: Lease) -> ExecutionResult {
        let job = &lease.job;
        let context = ErrorContext::job(job.id, &job.job_type, job.attempts);

        let handler = match self.registry.resolve(&job.job_type) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    worker_id = %self.worker_id,
                    "No handler registered for job type, dead-lettering"
                );
                self.reporter.capture_exception(&e, &context);
                self.settle_failure(&lease, JobFailure::permanent(e.to_string()))
                    .await;
                return ExecutionResult::Unregistered {
                    job_type: job.job_type.clone(),
                };
            }
        };

        let ctx = JobContext::new(job, self.worker_id);
        let outcome = AssertUnwindSafe(handler(ctx, job.payload.clone()))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(CaskError::HandlerExecution(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&lease).await {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %e,
                        "Failed to acknowledge job, it may be delivered again"
                    );
                }
                ExecutionResult::Completed
            }
            Err(e) => {
                self.reporter.capture_exception(&e, &context);
                let error = e.to_string();
                self.settle_failure(&lease, JobFailure::retryable(error.clone()))
                    .await;
                ExecutionResult::Failed {
                    error,
                    retryable: true,
                }
            }
        }
    }

    async fn settle_failure(&self, lease: &Lease, failure: JobFailure) {
        if let Err(e) = self.queue.fail(lease, failure).await {
            tracing::error!(
                job_id = %lease.job_id(),
                error = %e,
                "Failed to report job failure to queue"
            );
        }
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Handler succeeded and the job was acknowledged.
    Completed,
    /// Handler returned an error or panicked.
    Failed { error: String, retryable: bool },
    /// No handler for the job type. Never retried.
    Unregistered { job_type: String },
}

impl ExecutionResult {
    /// Check if execution was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the job was handed back to the queue for retry.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Failed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
