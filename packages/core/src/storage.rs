//! Transactional storage contract consumed by the engine.
//!
//! A backend runs a transaction body against a [`JobStorageTransaction`]
//! scoped to one queue. Writes made through the handle are visible to later
//! reads in the same body and to nobody else until the body returns `Ok`, at
//! which point the backend commits them atomically. An `Err` from the body
//! discards every buffered write.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::{JobId, JobRecord, QueueError};

/// Boxed future returned by dyn-compatible storage methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Body run inside a storage transaction.
pub type TransactionBody<'a> =
    Box<dyn FnOnce(&mut dyn JobStorageTransaction) -> Result<(), QueueError> + Send + 'a>;

/// Operations available inside a transaction, all scoped to one queue.
pub trait JobStorageTransaction {
    fn queue_name(&self) -> &str;

    fn get(&self, id: &JobId) -> Result<JobRecord, QueueError>;

    fn get_all(&self) -> Result<Vec<JobRecord>, QueueError>;

    /// Insert or replace by id.
    fn store(&mut self, job: JobRecord) -> Result<JobRecord, QueueError>;

    /// Removing an id that does not exist succeeds.
    fn remove(&mut self, id: &JobId) -> Result<JobId, QueueError>;

    fn remove_all(&mut self) -> Result<(), QueueError>;
}

/// A storage backend.
pub trait JobStorage: Send + Sync + 'static {
    /// Run `body` in a transaction on `queue`, committing only if it succeeds.
    fn execute<'a>(&'a self, queue: &'a str, body: TransactionBody<'a>) -> StorageFuture<'a, ()>;
}

/// Typed transactions on top of [`JobStorage::execute`].
pub trait JobStorageExt: JobStorage {
    fn transaction<'a, T, F>(
        &'a self,
        queue: &'a str,
        body: F,
    ) -> impl Future<Output = Result<T, QueueError>> + Send + 'a
    where
        T: Send + 'a,
        F: FnOnce(&mut dyn JobStorageTransaction) -> Result<T, QueueError> + Send + 'a,
    {
        async move {
            let mut output = None;
            let slot = &mut output;
            self.execute(
                queue,
                Box::new(move |tx: &mut dyn JobStorageTransaction| {
                    *slot = Some(body(tx)?);
                    Ok(())
                }),
            )
            .await?;
            output.ok_or_else(|| {
                QueueError::storage(format!("transaction on {queue} committed without a result"))
            })
        }
    }
}

impl<S: JobStorage + ?Sized> JobStorageExt for S {}

/// One buffered write, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Stored(JobRecord),
    Removed(JobId),
    RemovedAll,
}

/// Outcome of a successful transaction body, ready to be persisted.
#[derive(Debug, Default)]
pub struct Committed {
    /// State of the queue after the transaction. `None` when the queue holds
    /// no record at all (never stored, or cleared by `remove_all`).
    pub jobs: Option<HashMap<JobId, JobRecord>>,
    pub changes: Vec<Change>,
}

impl Committed {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Transaction handle over a snapshot of one queue.
///
/// Every backend loads a snapshot, runs the body against this handle and
/// persists [`Committed`] only when the body succeeded.
#[derive(Debug)]
pub struct BufferedTransaction {
    queue: String,
    jobs: Option<HashMap<JobId, JobRecord>>,
    changes: Vec<Change>,
}

impl BufferedTransaction {
    /// `snapshot` is `None` when the backend knows nothing about the queue.
    pub fn new(queue: impl Into<String>, snapshot: Option<HashMap<JobId, JobRecord>>) -> Self {
        Self {
            queue: queue.into(),
            jobs: snapshot,
            changes: Vec::new(),
        }
    }

    pub fn finish(self) -> Committed {
        Committed {
            jobs: self.jobs,
            changes: self.changes,
        }
    }
}

impl JobStorageTransaction for BufferedTransaction {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn get(&self, id: &JobId) -> Result<JobRecord, QueueError> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| QueueError::QueueNotFound(self.queue.clone()))?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| QueueError::job_not_found(&self.queue, id))
    }

    fn get_all(&self) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self
            .jobs
            .as_ref()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn store(&mut self, job: JobRecord) -> Result<JobRecord, QueueError> {
        self.jobs
            .get_or_insert_with(HashMap::new)
            .insert(job.id.clone(), job.clone());
        self.changes.push(Change::Stored(job.clone()));
        Ok(job)
    }

    fn remove(&mut self, id: &JobId) -> Result<JobId, QueueError> {
        if let Some(jobs) = self.jobs.as_mut() {
            jobs.remove(id);
        }
        self.changes.push(Change::Removed(id.clone()));
        Ok(id.clone())
    }

    fn remove_all(&mut self) -> Result<(), QueueError> {
        self.jobs = None;
        self.changes.push(Change::RemovedAll);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> JobRecord {
        JobRecord::new(JobId::new(id).unwrap(), "t", "q", vec![1])
    }

    #[test]
    fn reads_see_buffered_writes() {
        let mut tx = BufferedTransaction::new("q", None);
        assert!(matches!(
            tx.get(&JobId::new("a").unwrap()),
            Err(QueueError::QueueNotFound(_))
        ));

        tx.store(record("a")).unwrap();
        assert_eq!(tx.get(&JobId::new("a").unwrap()).unwrap().id.as_str(), "a");
        assert!(matches!(
            tx.get(&JobId::new("b").unwrap()),
            Err(QueueError::JobNotFound { .. })
        ));
        assert_eq!(tx.get_all().unwrap().len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut tx = BufferedTransaction::new("q", Some(HashMap::new()));
        let id = JobId::new("missing").unwrap();
        assert_eq!(tx.remove(&id).unwrap(), id);
        assert_eq!(tx.remove(&id).unwrap(), id);
    }

    #[test]
    fn remove_all_then_store_keeps_only_new_job() {
        let mut snapshot = HashMap::new();
        let old = record("old");
        snapshot.insert(old.id.clone(), old);
        let mut tx = BufferedTransaction::new("q", Some(snapshot));
        tx.remove_all().unwrap();
        tx.store(record("new")).unwrap();

        let committed = tx.finish();
        let jobs = committed.jobs.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs.contains_key(&JobId::new("new").unwrap()));
        assert_eq!(committed.changes.len(), 2);
        assert_eq!(committed.changes[0], Change::RemovedAll);
    }
}
