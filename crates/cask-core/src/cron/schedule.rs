use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::error::{CaskError, Result};

/// A parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The normalized cron expression.
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parse a 5-, 6- or 7-field cron expression.
    pub fn new(expression: &str) -> Result<Self> {
        let normalized = normalize_cron_expression(expression);

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            CaskError::InvalidSchedule(format!("'{}': {}", expression.trim(), e))
        })?;

        Ok(Self {
            expression: normalized,
            schedule,
        })
    }

    /// Get the cron expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the next scheduled time strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Get the next scheduled time after the given time, evaluating the
    /// expression in a specific timezone.
    pub fn next_after_in_tz(&self, after: DateTime<Utc>, timezone: Tz) -> Option<DateTime<Utc>> {
        let local_time = after.with_timezone(&timezone);

        self.schedule
            .after(&local_time)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Get all scheduled times in `(start, end)`.
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&start)
            .take_while(|dt| *dt < end)
            .collect()
    }
}

/// Normalize a cron expression to include seconds.
fn normalize_cron_expression(expr: &str) -> String {
    let expr = expr.trim();
    let parts: Vec<&str> = expr.split_whitespace().collect();

    match parts.len() {
        5 => format!("0 {}", parts.join(" ")),
        _ => parts.join(" "),
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CaskError::InvalidSchedule(format!("unknown timezone '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_five_part_cron() {
        let schedule = CronSchedule::new("*/5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "0 */5 * * * *");
    }

    #[test]
    fn test_parse_six_part_cron() {
        let schedule = CronSchedule::new("30 */5 * * * *").unwrap();
        assert_eq!(schedule.expression(), "30 */5 * * * *");
    }

    #[test]
    fn test_next_after_respects_reference_time() {
        let schedule = CronSchedule::new("* * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        assert_eq!(
            schedule.next_after(at),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_next_after_is_exclusive() {
        let schedule = CronSchedule::new("* * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(
            schedule.next_after(at),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap())
        );
    }

    #[test]
    fn test_hour_step_expression() {
        let schedule = CronSchedule::new("0 */2 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        assert_eq!(
            schedule.next_after(at),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_next_after_in_tz() {
        // 09:00 in New York is 14:00 UTC in January.
        let schedule = CronSchedule::new("0 9 * * *").unwrap();
        let tz = parse_timezone("America/New_York").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after_in_tz(at, tz),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_cron() {
        let result = CronSchedule::new("invalid");
        assert!(matches!(result, Err(CaskError::InvalidSchedule(_))));
    }

    #[test]
    fn test_invalid_timezone() {
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_between() {
        let schedule = CronSchedule::new("0 * * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
        let end = start + chrono::Duration::hours(3);
        let times = schedule.between(start, end);
        assert_eq!(times.len(), 3);
    }
}
