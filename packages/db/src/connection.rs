//! Database connection setup.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection mode: "mem://", "rocksdb://path" or a remote endpoint
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobqueue".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// In-memory database; every connection starts empty.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// RocksDB persistence (requires the `rocksdb` feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Read `SURREAL_ENDPOINT`, `SURREAL_NAMESPACE`, `SURREAL_DATABASE`,
    /// `SURREAL_USER` and `SURREAL_PASS`, falling back to the in-memory
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let credentials = match (std::env::var("SURREAL_USER"), std::env::var("SURREAL_PASS")) {
            (Ok(user), Ok(pass)) => Some((user, pass)),
            _ => None,
        };
        Self {
            endpoint: std::env::var("SURREAL_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: std::env::var("SURREAL_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("SURREAL_DATABASE").unwrap_or(defaults.database),
            credentials,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Corrupt job document in queue {queue}: {source}")]
    CorruptDocument {
        queue: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DbError> for queue_core::QueueError {
    fn from(err: DbError) -> Self {
        queue_core::QueueError::storage(err)
    }
}

/// Open a connection, authenticate if configured and select the namespace
/// and database.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
