use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::record::Job;

/// Context available to job handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job ID.
    pub job_id: Uuid,
    /// Job type/name.
    pub job_type: String,
    /// Current attempt number (1-based).
    pub attempt: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// ID of the worker pool executing the job.
    pub worker_id: Uuid,
}

impl JobContext {
    /// Create a context for a leased job.
    pub fn new(job: &Job, worker_id: Uuid) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            attempt: job.attempts,
            enqueued_at: job.enqueued_at,
            worker_id,
        }
    }

    /// Check if this is a retry attempt.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Time the job spent waiting since enqueue.
    pub fn queued_for(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}
