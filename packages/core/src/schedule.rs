//! Recurrence descriptors carried on job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed window a schedule is allowed to fire in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window covering every representable instant.
    pub fn unbounded() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

impl Default for DateWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// How often a job should recur. Persisted with the job; selection does not
/// consult it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSchedule {
    TimeInterval {
        every_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window: Option<DateWindow>,
    },
}

impl JobSchedule {
    pub fn every(interval: std::time::Duration) -> Self {
        Self::TimeInterval {
            every_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            window: None,
        }
    }

    pub fn within(self, window: DateWindow) -> Self {
        match self {
            Self::TimeInterval { every_ms, .. } => Self::TimeInterval {
                every_ms,
                window: Some(window),
            },
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        match self {
            Self::TimeInterval { every_ms, .. } => std::time::Duration::from_millis(*every_ms),
        }
    }

    /// Resolved window, unbounded when none was given.
    pub fn date_window(&self) -> DateWindow {
        match self {
            Self::TimeInterval { window, .. } => window.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unbounded_window_by_default() {
        let schedule = JobSchedule::every(Duration::from_secs(60));
        let window = schedule.date_window();
        assert_eq!(window, DateWindow::unbounded());
        assert!(window.contains(Utc::now()));
        assert_eq!(schedule.interval(), Duration::from_secs(60));
    }

    #[test]
    fn explicit_window_is_kept() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let schedule = JobSchedule::every(Duration::from_secs(5)).within(DateWindow::new(start, end));
        assert_eq!(schedule.date_window().end, end);
        assert!(!schedule.date_window().contains(end + chrono::Duration::seconds(1)));
    }
}
