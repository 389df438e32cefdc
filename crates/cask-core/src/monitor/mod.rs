//! Collaborator interfaces for health check-ins and error tracking.
//!
//! Scheduled tasks report their runs through a [`MonitoringSink`], and any
//! failure caught at a component boundary is handed to an [`ErrorReporter`].
//! Concrete backends live outside the core.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CaskError;

/// Identifier of an open check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckInId(Uuid);

impl CheckInId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CheckInId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckInId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status reported for a monitored run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    InProgress,
    Ok,
    Error,
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Receives start/finish reports for scheduled task runs.
pub trait MonitoringSink: Send + Sync {
    /// Open an `in_progress` check-in for the monitor `slug`.
    fn begin_check_in(&self, slug: &str, schedule: &str) -> CheckInId;

    /// Close a check-in with a terminal status.
    fn complete_check_in(&self, id: CheckInId, slug: &str, status: CheckInStatus);
}

/// Where a captured error was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Scheduler,
    Worker,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Worker => "worker",
        }
    }
}

/// Extra data attached to a captured exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub source: ErrorSource,
    pub extra: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(source: ErrorSource) -> Self {
        Self {
            source,
            extra: BTreeMap::new(),
        }
    }

    /// Context for a failed scheduled task run.
    pub fn task(task_name: &str, run_id: Uuid) -> Self {
        Self::new(ErrorSource::Scheduler)
            .with("monitor", task_name)
            .with("run_id", run_id)
    }

    /// Context for a failed job.
    pub fn job(job_id: Uuid, job_type: &str, attempt: u32) -> Self {
        Self::new(ErrorSource::Worker)
            .with("job", job_id)
            .with("job_type", job_type)
            .with("attempt", attempt)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(|s| s.as_str())
    }
}

/// Receives errors caught at component boundaries.
pub trait ErrorReporter: Send + Sync {
    fn capture_exception(&self, error: &CaskError, context: &ErrorContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_in_status_strings() {
        assert_eq!(CheckInStatus::InProgress.as_str(), "in_progress");
        assert_eq!(CheckInStatus::Ok.as_str(), "ok");
        assert_eq!(CheckInStatus::Error.as_str(), "error");
        assert_eq!(
            serde_json::to_value(CheckInStatus::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
    }

    #[test]
    fn test_job_error_context() {
        let id = Uuid::new_v4();
        let ctx = ErrorContext::job(id, "GenerateBottleDetails", 2);
        assert_eq!(ctx.source, ErrorSource::Worker);
        assert_eq!(ctx.get("job"), Some(id.to_string().as_str()));
        assert_eq!(ctx.get("job_type"), Some("GenerateBottleDetails"));
        assert_eq!(ctx.get("attempt"), Some("2"));
    }

    #[test]
    fn test_task_error_context() {
        let ctx = ErrorContext::task("scrape-astor-wines", Uuid::nil());
        assert_eq!(ctx.source.as_str(), "scheduler");
        assert_eq!(ctx.get("monitor"), Some("scrape-astor-wines"));
    }
}
