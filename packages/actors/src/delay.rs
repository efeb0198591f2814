//! Promotion of delayed jobs back to waiting.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{JobRecord, JobStatus};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::queue::JobQueue;

/// Re-armed by every synchronization pass with the queue's delayed jobs.
pub trait DelayStrategy: Send + Sync + 'static {
    fn update(&self, queue: &JobQueue, delayed: &[JobRecord]);

    /// Stop whatever the strategy runs for `queue_name`.
    fn stop(&self, _queue_name: &str) {}
}

/// Polls on a fixed period and releases delayed jobs whose time has passed.
///
/// One timer runs per queue name. It starts when a pass first reports delayed
/// jobs and stops when a pass reports none.
#[derive(Debug)]
pub struct DelayPollingStrategy {
    interval: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DelayPollingStrategy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_polling(&self, queue_name: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue_name)
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Default for DelayPollingStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl DelayStrategy for DelayPollingStrategy {
    fn update(&self, queue: &JobQueue, delayed: &[JobRecord]) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);

        if delayed.is_empty() {
            if let Some(timer) = timers.remove(queue.name()) {
                timer.abort();
                tracing::debug!(queue = queue.name(), "Stopped delay polling");
            }
            return;
        }

        if timers
            .get(queue.name())
            .is_some_and(|timer| !timer.is_finished())
        {
            return;
        }

        let Some(earliest) = delayed.iter().filter_map(JobRecord::delayed_until).min() else {
            return;
        };

        tracing::debug!(
            queue = queue.name(),
            delayed = delayed.len(),
            %earliest,
            "Started delay polling"
        );
        let timer = tokio::spawn(poll_delayed(queue.clone(), self.interval, earliest));
        timers.insert(queue.name().to_string(), timer);
    }

    fn stop(&self, queue_name: &str) {
        if let Some(timer) = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(queue_name)
        {
            timer.abort();
        }
    }
}

async fn poll_delayed(queue: JobQueue, period: Duration, earliest: DateTime<Utc>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !queue.is_running() {
            break;
        }
        let now = Utc::now();
        if now > earliest {
            release_elapsed(&queue, now).await;
        }
    }
}

async fn release_elapsed(queue: &JobQueue, now: DateTime<Utc>) {
    let jobs = match queue.get_all().await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(queue = queue.name(), error = %e, "Failed to load delayed jobs");
            return;
        }
    };

    let elapsed = jobs
        .into_iter()
        .filter(|job| job.delayed_until().is_some_and(|until| until < now));
    for job in elapsed {
        match queue.set_status(&job.id, JobStatus::Waiting).await {
            Ok(_) => tracing::debug!(queue = queue.name(), job_id = %job.id, "Released delayed job"),
            Err(e) => {
                tracing::debug!(queue = queue.name(), job_id = %job.id, error = %e, "Delayed job not released")
            }
        }
    }
}
