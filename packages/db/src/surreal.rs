//! [`JobStorage`] backed by SurrealDB.

use std::collections::HashMap;
use std::fmt::Write as _;

use queue_core::storage::Change;
use queue_core::{
    BufferedTransaction, Committed, JobId, JobRecord, JobStorage, QueueError, StorageFuture,
    TransactionBody,
};
use serde::Serialize;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::{Database, DbConfig, DbError, connect, init_schema};

/// Row written for every stored job.
#[derive(Debug, Serialize)]
struct JobRow {
    queue_name: String,
    job_id: String,
    job_type: String,
    status: &'static str,
    document: String,
}

impl JobRow {
    fn from_record(queue: &str, job: &JobRecord) -> Result<Self, DbError> {
        Ok(Self {
            queue_name: queue.to_string(),
            job_id: job.id.to_string(),
            job_type: job.job_type.clone(),
            status: job.status.as_str(),
            document: serde_json::to_string(job)?,
        })
    }
}

/// Stores each queue as rows of the `job` table.
///
/// A transaction loads the queue's rows, runs the body against a buffered
/// snapshot and writes the buffered changes back in a single SurrealQL
/// transaction. Transactions through one `SurrealStorage` run one at a time.
pub struct SurrealStorage {
    db: Database,
    lock: Mutex<()>,
}

impl SurrealStorage {
    /// Wrap an existing connection, creating the schema if needed.
    pub async fn new(db: Database) -> Result<Self, DbError> {
        init_schema(&db).await?;
        Ok(Self {
            db,
            lock: Mutex::new(()),
        })
    }

    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        Self::new(connect(config).await?).await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn load(&self, queue: &str) -> Result<Option<HashMap<JobId, JobRecord>>, DbError> {
        let mut response = self
            .db
            .query("SELECT VALUE document FROM job WHERE queue_name = $queue")
            .bind(("queue", queue.to_string()))
            .await?;
        let documents: Vec<String> = response.take(0)?;
        if documents.is_empty() {
            return Ok(None);
        }

        let mut jobs = HashMap::with_capacity(documents.len());
        for document in documents {
            let job: JobRecord =
                serde_json::from_str(&document).map_err(|source| DbError::CorruptDocument {
                    queue: queue.to_string(),
                    source,
                })?;
            jobs.insert(job.id.clone(), job);
        }
        Ok(Some(jobs))
    }

    async fn commit(&self, queue: &str, committed: Committed) -> Result<(), DbError> {
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        let mut rows = Vec::new();
        let mut keys = Vec::new();

        for change in &committed.changes {
            match change {
                Change::RemovedAll => {
                    sql.push_str("DELETE job WHERE queue_name = $queue;\n");
                }
                Change::Stored(job) => {
                    let n = keys.len();
                    let _ = writeln!(sql, "UPSERT type::thing('job', $key{n}) CONTENT $row{n};");
                    keys.push(record_key(queue, &job.id));
                    rows.push(Some(JobRow::from_record(queue, job)?));
                }
                Change::Removed(id) => {
                    let n = keys.len();
                    let _ = writeln!(sql, "DELETE type::thing('job', $key{n});");
                    keys.push(record_key(queue, id));
                    rows.push(None);
                }
            }
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(sql).bind(("queue", queue.to_string()));
        for (n, (key, row)) in keys.into_iter().zip(rows).enumerate() {
            query = query.bind((format!("key{n}"), key));
            if let Some(row) = row {
                query = query.bind((format!("row{n}"), row));
            }
        }
        query.await?.check()?;
        Ok(())
    }
}

impl std::fmt::Debug for SurrealStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealStorage").finish_non_exhaustive()
    }
}

/// Record ids are scoped by queue so two queues may reuse a job id.
fn record_key(queue: &str, id: &JobId) -> String {
    format!("{queue}/{id}")
}

impl JobStorage for SurrealStorage {
    fn execute<'a>(&'a self, queue: &'a str, body: TransactionBody<'a>) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if queue.is_empty() {
                return Err(QueueError::NoQueueContext);
            }

            let tx_id = Ulid::new();
            let _guard = self.lock.lock().await;
            let snapshot = self.load(queue).await?;
            let mut tx = BufferedTransaction::new(queue, snapshot);

            if let Err(e) = body(&mut tx) {
                tracing::trace!(queue, %tx_id, error = %e, "Rolled back transaction");
                return Err(e);
            }

            let committed = tx.finish();
            if committed.is_empty() {
                return Ok(());
            }
            let changes = committed.changes.len();
            self.commit(queue, committed).await?;
            tracing::trace!(queue, %tx_id, changes, "Committed transaction");
            Ok(())
        })
    }
}
