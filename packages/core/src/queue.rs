//! Queue configuration and runtime snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{JobRecord, JobStatus, QueueError};

/// Tuning for a queue's synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Quiet period before coalesced synchronization requests run a pass.
    pub debounce_ms: u64,
    /// Period of the delay-release poll timer.
    pub delay_poll_interval_ms: u64,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            delay_poll_interval_ms: 5_000,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `JOBQUEUE_DEBOUNCE_MS`, `JOBQUEUE_DELAY_POLL_MS`
    /// and `JOBQUEUE_EVENT_CAPACITY` when set.
    pub fn from_env() -> Result<Self, QueueError> {
        let mut config = Self::default();
        if let Some(value) = read_env("JOBQUEUE_DEBOUNCE_MS")? {
            config.debounce_ms = value;
        }
        if let Some(value) = read_env("JOBQUEUE_DELAY_POLL_MS")? {
            config.delay_poll_interval_ms = value;
        }
        if let Some(value) = read_env("JOBQUEUE_EVENT_CAPACITY")? {
            config.event_capacity = value;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = duration_ms(debounce);
        self
    }

    pub fn with_delay_poll_interval(mut self, interval: Duration) -> Self {
        self.delay_poll_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn delay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.delay_poll_interval_ms)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.delay_poll_interval_ms == 0 {
            return Err(QueueError::InvalidConfiguration(
                "delay_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfiguration(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, QueueError> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            QueueError::InvalidConfiguration(format!("{name}={raw} is not a valid number"))
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(QueueError::InvalidConfiguration(format!(
            "failed reading {name}: {e}"
        ))),
    }
}

/// Snapshot of a queue's synchronization state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub name: String,
    pub is_active: bool,
    pub is_synchronizing: bool,
    pub is_synchronize_pending: bool,
    pub active_processors: usize,
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub paused: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut stats = Self::default();
        for job in jobs {
            let slot = match job.status {
                JobStatus::Waiting => &mut stats.waiting,
                JobStatus::Active => &mut stats.active,
                JobStatus::Delayed { .. } => &mut stats.delayed,
                JobStatus::Paused => &mut stats.paused,
                JobStatus::Completed { .. } => &mut stats.completed,
                JobStatus::Failed { .. } => &mut stats.failed,
            };
            *slot += 1;
        }
        stats
    }

    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.delayed + self.paused + self.completed + self.failed
    }

    /// Jobs that still need processing.
    pub fn outstanding(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}
