//! SurrealDB storage backend for the job queue.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod surreal;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;
pub use surreal::SurrealStorage;
