use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock time for schedule evaluation.
pub trait Clock: Send + Sync + 'static {
    /// Current time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Maps tokio's monotonic clock onto a fixed UTC anchor.
///
/// Under a paused tokio runtime the reported time only moves when tokio time
/// advances, which makes schedule evaluation deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    origin: Instant,
}

impl TokioClock {
    /// Create a clock that reads `anchor` right now.
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.anchor + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = TokioClock::starting_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
