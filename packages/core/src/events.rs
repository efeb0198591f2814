//! Events pushed to queue subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CancellationReason, JobId, JobRecord};

/// Events emitted by a queue, in the order the queue observed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    // Queue lifecycle
    Resumed {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    Suspended {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    RegisteredProcessor {
        queue: String,
        job_type: String,
        concurrency: usize,
        timestamp: DateTime<Utc>,
    },

    // Mutations
    /// A job with a new id was stored.
    Added {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
    /// A stored job was replaced.
    Updated {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
    Removed {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
    UpdatedStatus {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
    UpdatedProgress {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },

    // Processing
    BeganProcessing {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
    /// `job` is `None` when the job vanished from storage.
    CancelledProcessing {
        queue: String,
        job: Option<JobRecord>,
        reason: CancellationReason,
        timestamp: DateTime<Utc>,
    },
    FailedProcessing {
        job: JobRecord,
        error: String,
        timestamp: DateTime<Utc>,
    },
    FinishedProcessing {
        job: JobRecord,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Resumed { timestamp, .. }
            | Self::Suspended { timestamp, .. }
            | Self::RegisteredProcessor { timestamp, .. }
            | Self::Added { timestamp, .. }
            | Self::Updated { timestamp, .. }
            | Self::Removed { timestamp, .. }
            | Self::UpdatedStatus { timestamp, .. }
            | Self::UpdatedProgress { timestamp, .. }
            | Self::BeganProcessing { timestamp, .. }
            | Self::CancelledProcessing { timestamp, .. }
            | Self::FailedProcessing { timestamp, .. }
            | Self::FinishedProcessing { timestamp, .. } => *timestamp,
        }
    }

    /// The job this event is about, if any.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            Self::Added { job, .. }
            | Self::Updated { job, .. }
            | Self::Removed { job, .. }
            | Self::UpdatedStatus { job, .. }
            | Self::UpdatedProgress { job, .. }
            | Self::BeganProcessing { job, .. }
            | Self::FailedProcessing { job, .. }
            | Self::FinishedProcessing { job, .. } => Some(job),
            Self::CancelledProcessing { job, .. } => job.as_ref(),
            Self::Resumed { .. } | Self::Suspended { .. } | Self::RegisteredProcessor { .. } => {
                None
            }
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job().map(|job| &job.id)
    }

    pub fn queue_name(&self) -> &str {
        match self {
            Self::Resumed { queue, .. }
            | Self::Suspended { queue, .. }
            | Self::RegisteredProcessor { queue, .. }
            | Self::CancelledProcessing { queue, .. } => queue,
            Self::Added { job, .. }
            | Self::Updated { job, .. }
            | Self::Removed { job, .. }
            | Self::UpdatedStatus { job, .. }
            | Self::UpdatedProgress { job, .. }
            | Self::BeganProcessing { job, .. }
            | Self::FailedProcessing { job, .. }
            | Self::FinishedProcessing { job, .. } => &job.queue_name,
        }
    }

    /// Human-readable one-line summary.
    pub fn description(&self) -> String {
        match self {
            Self::Resumed { queue, .. } => format!("Queue {queue} resumed"),
            Self::Suspended { queue, .. } => format!("Queue {queue} suspended"),
            Self::RegisteredProcessor {
                job_type,
                concurrency,
                ..
            } => format!("Registered processor for {job_type} (concurrency {concurrency})"),
            Self::Added { job, .. } => format!("Job {} added", job.id),
            Self::Updated { job, .. } => format!("Job {} updated", job.id),
            Self::Removed { job, .. } => format!("Job {} removed", job.id),
            Self::UpdatedStatus { job, .. } => format!("Job {} is now {}", job.id, job.status),
            Self::UpdatedProgress { job, .. } => match job.progress {
                Some(progress) => format!("Job {} progress {:.0}%", job.id, progress * 100.0),
                None => format!("Job {} progress cleared", job.id),
            },
            Self::BeganProcessing { job, .. } => format!("Job {} started", job.id),
            Self::CancelledProcessing { job, reason, .. } => match job {
                Some(job) => format!("Job {} cancelled: {reason}", job.id),
                None => format!("Processing cancelled: {reason}"),
            },
            Self::FailedProcessing { job, error, .. } => format!("Job {} failed: {error}", job.id),
            Self::FinishedProcessing { job, .. } => format!("Job {} finished", job.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_without_job_reports_queue() {
        let event = QueueEvent::CancelledProcessing {
            queue: "mail".to_string(),
            job: None,
            reason: CancellationReason::Removed,
            timestamp: Utc::now(),
        };
        assert_eq!(event.queue_name(), "mail");
        assert!(event.job_id().is_none());
        assert_eq!(event.description(), "Processing cancelled: removed");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "cancelled_processing");
        assert_eq!(json["reason"], "removed");
    }

    #[test]
    fn job_events_expose_the_job() {
        let job = JobRecord::new(JobId::new("j1").unwrap(), "t", "mail", vec![]);
        let event = QueueEvent::FinishedProcessing {
            job,
            timestamp: Utc::now(),
        };
        assert_eq!(event.job_id().map(JobId::as_str), Some("j1"));
        assert_eq!(event.queue_name(), "mail");
    }
}
