//! Schedule specifications for the dispatcher's timer set.

use std::time::Duration;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use croner::Cron;

use crate::dispatcher::DispatchError;

/// When a scheduled trigger fires.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Standard five-field cron expression.
    Cron(String),
    /// Fixed interval between fires.
    Interval(Duration),
}

impl ScheduleSpec {
    /// Build a cron schedule, validating the expression up front.
    pub fn cron(expression: impl Into<String>) -> Result<Self, DispatchError> {
        let expression = expression.into();
        Cron::from_str(&expression)
            .map_err(|e| DispatchError::InvalidCron(format!("{expression}: {e}")))?;
        Ok(ScheduleSpec::Cron(expression))
    }

    /// Build an interval schedule. Sub-millisecond intervals are clamped.
    pub fn every(interval: Duration) -> Self {
        ScheduleSpec::Interval(interval.max(Duration::from_millis(1)))
    }

    /// The next fire time after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Cron(expression) => {
                let cron = Cron::from_str(expression).ok()?;
                cron.find_next_occurrence(&from, false).ok()
            }
            ScheduleSpec::Interval(interval) => {
                Some(from + chrono::Duration::from_std(*interval).ok()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_cron_is_refused() {
        assert!(ScheduleSpec::cron("not a cron").is_err());
        assert!(ScheduleSpec::cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn interval_advances_from_now() {
        let spec = ScheduleSpec::every(Duration::from_secs(60));
        let now = Utc::now();
        let next = spec.next_after(now).unwrap();
        assert!(next > now);
        assert!((next - now).num_seconds() >= 59);
    }

    #[test]
    fn cron_finds_a_future_occurrence() {
        let spec = ScheduleSpec::cron("* * * * *").unwrap();
        let now = Utc::now();
        let next = spec.next_after(now).unwrap();
        assert!(next > now);
        assert!((next - now).num_seconds() <= 61);
    }
}
