//! Object storage backend for the job queue.
//!
//! Each queue is one JSON document in an `object_store` bucket:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests

mod config;
mod store;

pub use config::{S3Config, StoreBackend, StoreConfig, StoreKind};
pub use store::{ObjectStoreStorage, QueueDocument};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document {path} belongs to queue {found}")]
    QueueMismatch { path: String, found: String },
}

impl From<StoreError> for queue_core::QueueError {
    fn from(err: StoreError) -> Self {
        queue_core::QueueError::storage(err)
    }
}
