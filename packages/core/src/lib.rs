//! Core domain types for the job queue.
//!
//! This crate holds everything the engine and the storage backends share:
//! - `JobRecord`, `JobStatus` and the typed `Job` codec
//! - the deterministic `JobSorter`
//! - `QueueEvent` for subscribers
//! - the transactional `JobStorage` contract and an in-memory backend

mod codec;
mod error;
mod events;
mod job;
mod memory;
mod queue;
mod schedule;
mod sorter;
pub mod storage;

pub use codec::{Job, decode_payload, encode_payload};
pub use error::{BoxError, QueueError};
pub use events::QueueEvent;
pub use job::{CancellationReason, JobId, JobRecord, JobStatus};
pub use memory::InMemoryStorage;
pub use queue::{QueueConfig, QueueState, QueueStats};
pub use schedule::{DateWindow, JobSchedule};
pub use sorter::{DefaultJobSorter, JobSorter};
pub use storage::{
    BufferedTransaction, Committed, JobStorage, JobStorageExt, JobStorageTransaction,
    StorageFuture, TransactionBody,
};
