use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job identifier assigned at enqueue time.
pub type JobId = Uuid;

/// A unit of work on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Job type, used to resolve the handler.
    pub job_type: String,
    /// Opaque payload handed to the handler.
    pub payload: serde_json::Value,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the job has been leased.
    pub attempts: u32,
}

impl Job {
    /// Create a new job record.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// A worker's temporary claim on a job.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Token proving ownership; acks and fails must present it.
    pub token: Uuid,
    /// The leased job, with `attempts` already counting this lease.
    pub job: Job,
    pub leased_at: DateTime<Utc>,
    /// After this instant the queue may hand the job to another worker.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn job_id(&self) -> JobId {
        self.job.id
    }
}

/// Why a leased job failed, and whether the queue may retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    /// Failure subject to the queue's retry policy.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Failure that must go straight to the dead-letter set.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Returned to producers after a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub job_type: String,
    pub enqueued_at: DateTime<Utc>,
}
