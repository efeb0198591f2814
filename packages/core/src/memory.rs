//! Reference in-memory storage backend.

use std::collections::HashMap;

use tokio::sync::Mutex;
use ulid::Ulid;

use crate::storage::{BufferedTransaction, JobStorage, StorageFuture, TransactionBody};
use crate::{JobId, JobRecord, QueueError};

/// Keeps every queue in a map guarded by one async mutex, so transactions run
/// one at a time.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    queues: Mutex<HashMap<String, HashMap<JobId, JobRecord>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of queues currently holding state.
    pub async fn queue_names(&self) -> Vec<String> {
        self.queues.lock().await.keys().cloned().collect()
    }
}

impl JobStorage for InMemoryStorage {
    fn execute<'a>(&'a self, queue: &'a str, body: TransactionBody<'a>) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if queue.is_empty() {
                return Err(QueueError::NoQueueContext);
            }

            let tx_id = Ulid::new();
            let mut queues = self.queues.lock().await;
            let mut tx = BufferedTransaction::new(queue, queues.get(queue).cloned());

            if let Err(e) = body(&mut tx) {
                tracing::trace!(queue, %tx_id, error = %e, "Rolled back transaction");
                return Err(e);
            }

            let committed = tx.finish();
            if committed.is_empty() {
                return Ok(());
            }
            let changes = committed.changes.len();
            match committed.jobs {
                Some(jobs) => {
                    queues.insert(queue.to_string(), jobs);
                }
                None => {
                    queues.remove(queue);
                }
            }
            tracing::trace!(queue, %tx_id, changes, "Committed transaction");
            Ok(())
        })
    }
}
