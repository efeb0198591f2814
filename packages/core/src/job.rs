//! Job records, identifiers and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::codec::Job;
use crate::{JobSchedule, QueueError};

/// Identifier of a job, unique within its queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Build an id from caller-supplied text. Empty ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, QueueError> {
        let id = id.into();
        if id.is_empty() {
            return Err(QueueError::InvalidJobId);
        }
        Ok(Self(id))
    }

    /// Mint a fresh ULID-backed id; these sort by creation time.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for JobId {
    type Error = QueueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Lifecycle status of a job.
///
/// The variant set is closed. Which transitions are legal is decided by the
/// engine, not by this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for selection.
    #[default]
    Waiting,
    /// Bound to a live processor.
    Active,
    Completed {
        at: DateTime<Utc>,
    },
    /// Held back until the delay-release strategy promotes it.
    Delayed {
        until: DateTime<Utc>,
    },
    Failed {
        at: DateTime<Utc>,
        message: String,
    },
    Paused,
}

impl JobStatus {
    pub fn completed_now() -> Self {
        Self::Completed { at: Utc::now() }
    }

    pub fn failed_now(message: impl Into<String>) -> Self {
        Self::Failed {
            at: Utc::now(),
            message: message.into(),
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::Delayed { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Only waiting and active jobs can be selected for processing.
    pub fn is_selectable(&self) -> bool {
        matches!(self, Self::Waiting | Self::Active)
    }

    /// Short status name used in logs and storage indexes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed { .. } => "completed",
            Self::Delayed { .. } => "delayed",
            Self::Failed { .. } => "failed",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed { at } => write!(f, "completed at {at}"),
            Self::Delayed { until } => write!(f, "delayed until {until}"),
            Self::Failed { at, message } => write!(f, "failed at {at}: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Selects the processor configuration that handles this job.
    pub job_type: String,
    pub queue_name: String,
    /// Opaque bytes produced by the job type's codec.
    pub payload: Vec<u8>,
    pub queued_at: DateTime<Utc>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<JobSchedule>,
    /// Explicit processing order; lower values run first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

impl JobRecord {
    /// Create a waiting job queued now.
    pub fn new(
        id: JobId,
        job_type: impl Into<String>,
        queue_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            queue_name: queue_name.into(),
            payload,
            queued_at: Utc::now(),
            status: JobStatus::Waiting,
            schedule: None,
            order: None,
            progress: None,
        }
    }

    /// Create a job whose type and payload come from a [`Job`] implementation.
    pub fn typed<J: Job>(
        id: JobId,
        queue_name: impl Into<String>,
        payload: &J::Payload,
    ) -> Result<Self, QueueError> {
        Ok(Self::new(id, J::NAME, queue_name, J::serialize(payload)?))
    }

    /// Decode the payload as `J`, refusing records that belong to another type.
    pub fn payload_as<J: Job>(&self) -> Result<J::Payload, QueueError> {
        if self.job_type != J::NAME {
            return Err(QueueError::JobTypeMismatch {
                expected: J::NAME.to_string(),
                found: self.job_type.clone(),
            });
        }
        J::deserialize(&self.payload)
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_order(mut self, order: f32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_schedule(mut self, schedule: JobSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_queued_at(mut self, queued_at: DateTime<Utc>) -> Self {
        self.queued_at = queued_at;
        self
    }

    pub fn delayed_until(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Delayed { until } => Some(*until),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Completed { at } => Some(*at),
            _ => None,
        }
    }

    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Failed { at, .. } => Some(*at),
            _ => None,
        }
    }

    pub fn failed_message(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn is_failed(&self) -> bool {
        self.status.is_failed()
    }

    pub fn is_delayed(&self) -> bool {
        self.status.is_delayed()
    }
}

/// Why the engine signalled a live processor to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    StatusChangedToWaiting,
    StatusChangedToDelayed,
    Removed,
    StatusChangedToPaused,
    QueueSuspended,
}

impl CancellationReason {
    /// Reason reported when a still-stored job drops out of the selection.
    pub fn for_deselected(status: &JobStatus) -> Self {
        match status {
            JobStatus::Delayed { .. } => Self::StatusChangedToDelayed,
            JobStatus::Paused => Self::StatusChangedToPaused,
            _ => Self::StatusChangedToWaiting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChangedToWaiting => "status_changed_to_waiting",
            Self::StatusChangedToDelayed => "status_changed_to_delayed",
            Self::Removed => "removed",
            Self::StatusChangedToPaused => "status_changed_to_paused",
            Self::QueueSuspended => "queue_suspended",
        }
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
