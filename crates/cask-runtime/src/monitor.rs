use cask_core::monitor::{
    CheckInId, CheckInStatus, ErrorContext, ErrorReporter, MonitoringSink,
};
use cask_core::CaskError;

/// Emits check-ins as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl MonitoringSink for TracingMonitor {
    fn begin_check_in(&self, slug: &str, schedule: &str) -> CheckInId {
        let id = CheckInId::new();
        tracing::info!(
            monitor = slug,
            check_in = %id,
            schedule = schedule,
            status = CheckInStatus::InProgress.as_str(),
            "Check-in opened"
        );
        id
    }

    fn complete_check_in(&self, id: CheckInId, slug: &str, status: CheckInStatus) {
        match status {
            CheckInStatus::Error => tracing::warn!(
                monitor = slug,
                check_in = %id,
                status = status.as_str(),
                "Check-in closed"
            ),
            _ => tracing::info!(
                monitor = slug,
                check_in = %id,
                status = status.as_str(),
                "Check-in closed"
            ),
        }
    }
}

/// Emits captured exceptions as error-level log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn capture_exception(&self, error: &CaskError, context: &ErrorContext) {
        tracing::error!(
            source = context.source.as_str(),
            extra = ?context.extra,
            error = %error,
            "Captured exception"
        );
    }
}
