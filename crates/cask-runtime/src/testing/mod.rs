//! In-memory collaborators for asserting on check-ins and captured errors.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cask_core::monitor::{
    CheckInId, CheckInStatus, ErrorContext, ErrorReporter, MonitoringSink,
};
use cask_core::CaskError;

/// A check-in event seen by [`RecordingMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInEvent {
    pub id: CheckInId,
    pub slug: String,
    pub schedule: Option<String>,
    pub status: CheckInStatus,
}

/// Records every check-in in arrival order.
#[derive(Debug, Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<CheckInEvent>>,
}

impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CheckInEvent> {
        lock(&self.events).clone()
    }

    /// Statuses reported for one monitor slug, in order.
    pub fn statuses_for(&self, slug: &str) -> Vec<CheckInStatus> {
        lock(&self.events)
            .iter()
            .filter(|e| e.slug == slug)
            .map(|e| e.status)
            .collect()
    }
}

impl MonitoringSink for RecordingMonitor {
    fn begin_check_in(&self, slug: &str, schedule: &str) -> CheckInId {
        let id = CheckInId::new();
        lock(&self.events).push(CheckInEvent {
            id,
            slug: slug.to_string(),
            schedule: Some(schedule.to_string()),
            status: CheckInStatus::InProgress,
        });
        id
    }

    fn complete_check_in(&self, id: CheckInId, slug: &str, status: CheckInStatus) {
        lock(&self.events).push(CheckInEvent {
            id,
            slug: slug.to_string(),
            schedule: None,
            status,
        });
    }
}

/// An exception seen by [`RecordingErrorReporter`].
#[derive(Debug, Clone)]
pub struct CapturedError {
    pub message: String,
    pub unregistered_handler: bool,
    pub context: ErrorContext,
}

/// Records every captured exception.
#[derive(Debug, Default)]
pub struct RecordingErrorReporter {
    captured: Mutex<Vec<CapturedError>>,
}

impl RecordingErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<CapturedError> {
        lock(&self.captured).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.captured).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.captured).is_empty()
    }
}

impl ErrorReporter for RecordingErrorReporter {
    fn capture_exception(&self, error: &CaskError, context: &ErrorContext) {
        lock(&self.captured).push(CapturedError {
            message: error.to_string(),
            unregistered_handler: matches!(error, CaskError::UnregisteredHandler(_)),
            context: context.clone(),
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_monitor_pairs_ids() {
        let monitor = RecordingMonitor::new();
        let id = monitor.begin_check_in("ping", "0 * * * * *");
        monitor.complete_check_in(id, "ping", CheckInStatus::Ok);

        let events = monitor.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, events[1].id);
        assert_eq!(
            monitor.statuses_for("ping"),
            vec![CheckInStatus::InProgress, CheckInStatus::Ok]
        );
        assert!(monitor.statuses_for("other").is_empty());
    }

    #[test]
    fn test_recording_reporter() {
        let reporter = RecordingErrorReporter::new();
        assert!(reporter.is_empty());

        reporter.capture_exception(
            &CaskError::UnregisteredHandler("SendEmail".into()),
            &ErrorContext::job(uuid::Uuid::nil(), "SendEmail", 1),
        );

        let captured = reporter.captured();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].unregistered_handler);
        assert_eq!(captured[0].context.get("job_type"), Some("SendEmail"));
    }
}
