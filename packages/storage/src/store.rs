//! [`JobStorage`] over an `object_store` bucket.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use queue_core::{
    BufferedTransaction, JobId, JobRecord, JobStorage, QueueError, StorageFuture, TransactionBody,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::config::{StoreBackend, StoreConfig, StoreKind, build_s3, non_empty};
use crate::StoreError;

/// Serialized form of one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDocument {
    pub queue_name: String,
    /// Sorted by id.
    pub jobs: Vec<JobRecord>,
}

impl QueueDocument {
    fn new(queue_name: &str, jobs: HashMap<JobId, JobRecord>) -> Self {
        let mut jobs: Vec<JobRecord> = jobs.into_values().collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            queue_name: queue_name.to_string(),
            jobs,
        }
    }
}

/// Stores each queue as `queues/<name>.json`, rewritten whole on commit.
///
/// Object stores have no multi-object transactions, so the single document
/// per queue is what makes a commit atomic. Transactions through one
/// instance are serialized; sharing a bucket between processes is not
/// supported.
pub struct ObjectStoreStorage {
    kind: StoreKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    lock: Mutex<()>,
}

impl ObjectStoreStorage {
    pub async fn new(cfg: StoreConfig) -> Result<Self, StoreError> {
        let (kind, store): (StoreKind, Arc<dyn ObjectStore>) = match cfg.backend {
            StoreBackend::S3(s3) => (StoreKind::S3, Arc::new(build_s3(s3)?)),
            StoreBackend::Filesystem { root } => {
                std::fs::create_dir_all(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StoreKind::Filesystem, Arc::new(fs))
            }
            StoreBackend::Memory => (
                StoreKind::Memory,
                Arc::new(object_store::memory::InMemory::new()),
            ),
        };
        tracing::info!(backend = kind.as_str(), "Opened queue object store");

        Ok(Self::with_store(kind, store, cfg.prefix))
    }

    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(StoreConfig::from_env()?).await
    }

    /// Use an already-built store.
    pub fn with_store(kind: StoreKind, store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        Self {
            kind,
            store,
            prefix: prefix.and_then(non_empty),
            lock: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Location of a queue's document.
    pub fn document_path(&self, queue: &str) -> Path {
        let file = format!("{queue}.json");
        let prefix = self.prefix.as_deref().map(|p| p.trim_matches('/')).unwrap_or("");
        let parts = prefix
            .split('/')
            .filter(|part| !part.is_empty())
            .chain(["queues", file.as_str()]);
        Path::from_iter(parts)
    }

    /// The stored document for `queue`, if any.
    pub async fn read_document(&self, queue: &str) -> Result<Option<QueueDocument>, StoreError> {
        let path = self.document_path(queue);
        let bytes = match self.store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: QueueDocument = serde_json::from_slice(&bytes)?;
        if document.queue_name != queue {
            return Err(StoreError::QueueMismatch {
                path: path.to_string(),
                found: document.queue_name,
            });
        }
        Ok(Some(document))
    }

    async fn load(&self, queue: &str) -> Result<Option<HashMap<JobId, JobRecord>>, StoreError> {
        Ok(self.read_document(queue).await?.map(|document| {
            document
                .jobs
                .into_iter()
                .map(|job| (job.id.clone(), job))
                .collect()
        }))
    }

    async fn save(
        &self,
        queue: &str,
        jobs: Option<HashMap<JobId, JobRecord>>,
    ) -> Result<(), StoreError> {
        let path = self.document_path(queue);
        match jobs {
            Some(jobs) => {
                let bytes = serde_json::to_vec(&QueueDocument::new(queue, jobs))?;
                self.store.put(&path, PutPayload::from(Bytes::from(bytes))).await?;
            }
            None => match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObjectStoreStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreStorage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl JobStorage for ObjectStoreStorage {
    fn execute<'a>(&'a self, queue: &'a str, body: TransactionBody<'a>) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if queue.is_empty() {
                return Err(QueueError::NoQueueContext);
            }

            let tx_id = Ulid::new();
            let _guard = self.lock.lock().await;
            let mut tx = BufferedTransaction::new(queue, self.load(queue).await?);

            if let Err(e) = body(&mut tx) {
                tracing::trace!(queue, %tx_id, error = %e, "Rolled back transaction");
                return Err(e);
            }

            let committed = tx.finish();
            if committed.is_empty() {
                return Ok(());
            }
            let changes = committed.changes.len();
            self.save(queue, committed.jobs).await?;
            tracing::trace!(queue, %tx_id, changes, "Committed transaction");
            Ok(())
        })
    }
}
