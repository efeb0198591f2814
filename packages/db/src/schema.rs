//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Create the job table and its indexes. Safe to run repeatedly.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");
    db.query(JOB_SCHEMA).await?.check()?;
    tracing::info!("Database schema initialized");
    Ok(())
}

/// One row per job. `document` holds the whole serialized record; the other
/// fields are copies kept for indexing and ad-hoc queries.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS queue_name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS job_type ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string;
DEFINE FIELD IF NOT EXISTS document ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE datetime VALUE time::now();

DEFINE INDEX IF NOT EXISTS job_queue ON job FIELDS queue_name;
DEFINE INDEX IF NOT EXISTS job_queue_status ON job FIELDS queue_name, status;
"#;
