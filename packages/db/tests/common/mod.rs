use db::{DbConfig, DbError, SurrealStorage};

/// Fresh in-memory database per call, so tests never share rows.
pub async fn setup_storage() -> Result<SurrealStorage, DbError> {
    SurrealStorage::connect(&DbConfig::memory()).await
}
