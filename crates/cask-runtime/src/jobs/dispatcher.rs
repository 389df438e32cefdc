use std::sync::Arc;

use cask_core::job::{CaskJob, JobHandle, QueueClient};
use cask_core::Result;
use chrono::Utc;
use serde::Serialize;

/// Enqueues jobs onto the queue.
///
/// Fire-and-forget: the returned handle identifies the job but nothing waits
/// for it to run. Job types are not checked against any registry here; an
/// unknown type fails later in the worker.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn QueueClient>,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(queue: Arc<dyn QueueClient>) -> Self {
        Self { queue }
    }

    /// Enqueue a job by type name.
    pub async fn enqueue(&self, job_type: &str, payload: impl Serialize) -> Result<JobHandle> {
        let payload = serde_json::to_value(payload)?;
        let id = self.queue.enqueue(job_type, payload).await.map_err(|e| {
            tracing::warn!(job_type = job_type, error = %e, "Enqueue failed");
            e
        })?;

        tracing::debug!(job_id = %id, job_type = job_type, "Job enqueued");

        Ok(JobHandle {
            id,
            job_type: job_type.to_string(),
            enqueued_at: Utc::now(),
        })
    }

    /// Enqueue a typed job.
    pub async fn dispatch<J: CaskJob>(&self, args: J::Args) -> Result<JobHandle> {
        self.enqueue(J::NAME, args).await
    }

    pub fn queue(&self) -> &Arc<dyn QueueClient> {
        &self.queue
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
