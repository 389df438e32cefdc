use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::monitor::CheckInId;

/// Lifecycle of a single task fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Fired, not yet started.
    Pending,
    /// Callback executing.
    Running,
    /// Callback completed successfully.
    Succeeded,
    /// Callback returned an error or panicked.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One fire of a recurring task.
#[derive(Debug, Clone)]
pub struct TaskRun {
    /// Run ID.
    pub id: Uuid,
    /// Task name.
    pub task_name: String,
    /// The due time that caused this fire.
    pub scheduled_time: DateTime<Utc>,
    /// Monitoring check-in opened for this run.
    pub monitor_id: Option<CheckInId>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl TaskRun {
    /// Create a new pending run.
    pub fn new(task_name: impl Into<String>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            scheduled_time,
            monitor_id: None,
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self, monitor_id: CheckInId, at: DateTime<Utc>) {
        self.monitor_id = Some(monitor_id);
        self.status = RunStatus::Running;
        self.started_at = Some(at);
    }

    pub fn succeed(&mut self, at: DateTime<Utc>) {
        self.status = RunStatus::Succeeded;
        self.completed_at = Some(at);
    }

    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(at);
        self.error = Some(error.into());
    }

    /// Delay between the due time and the actual start.
    pub fn delay(&self) -> Option<chrono::Duration> {
        self.started_at.map(|started| started - self.scheduled_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_strings() {
        assert_eq!(RunStatus::Pending.as_str(), "pending");
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert_eq!(RunStatus::Succeeded.as_str(), "succeeded");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_run_lifecycle() {
        let scheduled = Utc::now();
        let mut run = TaskRun::new("scrape-total-wine", scheduled);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.monitor_id.is_none());

        let check_in = CheckInId::new();
        run.start(check_in, scheduled + chrono::Duration::seconds(2));
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.monitor_id, Some(check_in));
        assert_eq!(run.delay(), Some(chrono::Duration::seconds(2)));

        run.fail(Utc::now(), "upstream returned 503");
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("upstream returned 503"));
    }
}
