//! Error taxonomy shared by the engine and every storage backend.

use thiserror::Error;

use crate::{JobId, JobStatus};

/// Boxed error raised by a storage backend, kept as the source of
/// [`QueueError::Storage`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by queue operations and storage transactions.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue name was provided for the transaction")]
    NoQueueContext,
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("job {id} not found in queue {queue}")]
    JobNotFound { queue: String, id: JobId },
    #[error("job id must not be empty")]
    InvalidJobId,
    #[error("job type mismatch: expected {expected}, found {found}")]
    JobTypeMismatch { expected: String, found: String },
    #[error("payload serialization failed: {0}")]
    PayloadSerializationFailed(String),
    #[error("payload deserialization failed: {0}")]
    PayloadDeserializationFailed(String),
    #[error("invalid queue configuration: {0}")]
    InvalidConfiguration(String),
    #[error("job {id} cannot move from {from} to {to} through the public API")]
    InvalidStatusTransition {
        id: JobId,
        from: &'static str,
        to: &'static str,
    },
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl QueueError {
    /// Wrap a backend error so it propagates unchanged as the error source.
    pub fn storage(err: impl Into<BoxError>) -> Self {
        Self::Storage(err.into())
    }

    pub fn job_not_found(queue: impl Into<String>, id: &JobId) -> Self {
        Self::JobNotFound {
            queue: queue.into(),
            id: id.clone(),
        }
    }

    pub fn invalid_transition(id: &JobId, from: &JobStatus, to: &JobStatus) -> Self {
        Self::InvalidStatusTransition {
            id: id.clone(),
            from: from.as_str(),
            to: to.as_str(),
        }
    }

    /// True for both queue-level and job-level "not found" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::QueueNotFound(_) | Self::JobNotFound { .. })
    }
}
