use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;

use super::schedule::{parse_timezone, CronSchedule};
use crate::error::{CaskError, Result};

/// Boxed zero-argument task callback.
pub type TaskCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A recurring task: a named cron schedule bound to an async callback.
#[derive(Clone)]
pub struct TaskDefinition {
    name: String,
    schedule: CronSchedule,
    timezone: Tz,
    prevent_overrun: bool,
    callback: TaskCallback,
}

impl TaskDefinition {
    /// Create a task evaluated in UTC.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        expression: &str,
        prevent_overrun: bool,
        callback: F,
    ) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CaskError::Config("task name must not be empty".to_string()));
        }

        let callback: TaskCallback =
            Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(callback()) });

        Ok(Self {
            name,
            schedule: CronSchedule::new(expression)?,
            timezone: Tz::UTC,
            prevent_overrun,
            callback,
        })
    }

    /// Evaluate the schedule in the given IANA timezone.
    pub fn with_timezone(mut self, timezone: &str) -> Result<Self> {
        self.timezone = parse_timezone(timezone)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn prevent_overrun(&self) -> bool {
        self.prevent_overrun
    }

    /// Next fire time strictly after `after`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.next_after_in_tz(after, self.timezone)
    }

    /// Start one execution of the callback.
    pub fn invoke(&self) -> BoxFuture<'static, Result<()>> {
        (self.callback)()
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule.expression())
            .field("timezone", &self.timezone)
            .field("prevent_overrun", &self.prevent_overrun)
            .finish_non_exhaustive()
    }
}
