//! Public handle to a running queue.

use std::sync::Arc;

use chrono::Utc;
use queue_core::{
    DefaultJobSorter, JobId, JobRecord, JobSorter, JobStatus, JobStorage, JobStorageExt,
    JobStorageTransaction, QueueConfig, QueueError, QueueEvent, QueueState, QueueStats,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, ActorStatus, RpcReplyPort};
use tokio::sync::broadcast;

use crate::delay::{DelayPollingStrategy, DelayStrategy};
use crate::messages::QueueMessage;
use crate::processor::{ProcessContext, ProcessFuture, Processor, ProcessorFactory};
use crate::queue_actor::{QueueActor, QueueActorArgs};
use crate::registry::global_registry;

/// Configures and starts a queue.
pub struct QueueBuilder {
    name: String,
    storage: Arc<dyn JobStorage>,
    config: QueueConfig,
    sorter: Arc<dyn JobSorter>,
    delay_strategy: Option<Arc<dyn DelayStrategy>>,
}

impl QueueBuilder {
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sorter(mut self, sorter: impl JobSorter) -> Self {
        self.sorter = Arc::new(sorter);
        self
    }

    /// Defaults to a [`DelayPollingStrategy`] using the configured interval.
    pub fn with_delay_strategy(mut self, strategy: Arc<dyn DelayStrategy>) -> Self {
        self.delay_strategy = Some(strategy);
        self
    }

    /// Validate the configuration and spawn the queue actor. The queue starts
    /// suspended.
    pub async fn start(self) -> Result<JobQueue, QueueError> {
        if self.name.is_empty() {
            return Err(QueueError::NoQueueContext);
        }
        self.config.validate()?;
        if global_registry().lookup(&self.name).is_ok() {
            return Err(QueueError::InvalidConfiguration(format!(
                "queue {} is already running",
                self.name
            )));
        }

        let (events, _) = broadcast::channel(self.config.event_capacity);
        let delay_strategy = self.delay_strategy.unwrap_or_else(|| {
            Arc::new(DelayPollingStrategy::new(self.config.delay_poll_interval()))
        });
        let args = QueueActorArgs {
            name: self.name.clone(),
            storage: Arc::clone(&self.storage),
            events: events.clone(),
            config: self.config,
            sorter: self.sorter,
            delay_strategy,
        };

        let (actor, _handle) = Actor::spawn(Some(format!("queue-{}", self.name)), QueueActor, args)
            .await
            .map_err(|e| {
                QueueError::QueueUnavailable(format!("failed to start queue {}: {e}", self.name))
            })?;

        let queue = JobQueue::from_parts(self.name, self.storage, actor, events);
        global_registry().register(queue.clone());
        Ok(queue)
    }
}

/// Cheap, cloneable handle to a queue.
///
/// Storage reads and writes run on the caller's task. Anything touching the
/// synchronization state is forwarded to the queue actor.
#[derive(Clone)]
pub struct JobQueue {
    name: Arc<str>,
    storage: Arc<dyn JobStorage>,
    actor: ActorRef<QueueMessage>,
    events: broadcast::Sender<QueueEvent>,
}

impl JobQueue {
    pub fn builder(name: impl Into<String>, storage: Arc<dyn JobStorage>) -> QueueBuilder {
        QueueBuilder {
            name: name.into(),
            storage,
            config: QueueConfig::default(),
            sorter: Arc::new(DefaultJobSorter),
            delay_strategy: None,
        }
    }

    /// Start a queue with default configuration.
    pub async fn start(
        name: impl Into<String>,
        storage: Arc<dyn JobStorage>,
    ) -> Result<Self, QueueError> {
        Self::builder(name, storage).start().await
    }

    pub(crate) fn from_parts(
        name: impl Into<Arc<str>>,
        storage: Arc<dyn JobStorage>,
        actor: ActorRef<QueueMessage>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            actor,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// False once the queue actor is stopping.
    pub fn is_running(&self) -> bool {
        !matches!(
            self.actor.get_status(),
            ActorStatus::Stopping | ActorStatus::Stopped
        )
    }

    // Lifecycle

    /// Returns true if the queue was suspended before.
    pub async fn resume(&self) -> Result<bool, QueueError> {
        self.call(|reply| QueueMessage::Resume { reply }).await
    }

    /// Returns true if the queue was active before. In-flight processors are
    /// asked to stop but keep running until they return.
    pub async fn suspend(&self) -> Result<bool, QueueError> {
        self.call(|reply| QueueMessage::Suspend { reply }).await
    }

    pub async fn state(&self) -> Result<QueueState, QueueError> {
        self.call(|reply| QueueMessage::GetState { reply }).await
    }

    pub async fn is_active(&self) -> Result<bool, QueueError> {
        Ok(self.state().await?.is_active)
    }

    /// Cancel live processors, stop delay polling and stop the actor.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        global_registry().unregister(&self.name);
        self.send(QueueMessage::Shutdown)
    }

    // Registration

    pub fn register(
        &self,
        job_type: impl Into<String>,
        concurrency: usize,
        factory: ProcessorFactory,
    ) -> Result<(), QueueError> {
        self.send(QueueMessage::Register {
            job_type: job_type.into(),
            concurrency,
            factory,
        })
    }

    /// Register a typed processor, built with `P::default()` per job.
    pub fn register_processor<P: Processor>(&self, concurrency: usize) -> Result<(), QueueError> {
        self.register(
            <P::Job as queue_core::Job>::NAME,
            concurrency,
            ProcessorFactory::typed::<P>(),
        )
    }

    pub fn register_fn<F>(
        &self,
        job_type: impl Into<String>,
        concurrency: usize,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(JobRecord, ProcessContext) -> ProcessFuture + Send + Sync + 'static,
    {
        self.register(job_type, concurrency, ProcessorFactory::from_fn(handler))
    }

    // Queries

    /// Run `body` in a storage transaction on this queue. Does not request a
    /// synchronization pass or emit events.
    pub async fn transaction<T, F>(&self, body: F) -> Result<T, QueueError>
    where
        T: Send,
        F: FnOnce(&mut dyn JobStorageTransaction) -> Result<T, QueueError> + Send,
    {
        self.storage.transaction(&self.name, body).await
    }

    pub async fn get(&self, id: &JobId) -> Result<JobRecord, QueueError> {
        self.transaction(|tx| tx.get(id)).await
    }

    pub async fn get_all(&self) -> Result<Vec<JobRecord>, QueueError> {
        self.transaction(|tx| tx.get_all()).await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::from_jobs(&self.get_all().await?))
    }

    // Mutations

    /// Insert or replace `job`, then request a synchronization pass.
    pub async fn store(&self, job: JobRecord) -> Result<JobRecord, QueueError> {
        self.store_with(job, true).await
    }

    /// The record's `queue_name` is set to this queue's name.
    pub async fn store_with(
        &self,
        mut job: JobRecord,
        synchronize: bool,
    ) -> Result<JobRecord, QueueError> {
        job.queue_name = self.name.to_string();
        let (stored, replaced) = self
            .transaction(move |tx| {
                let replaced = exists(tx, &job.id)?;
                Ok((tx.store(job)?, replaced))
            })
            .await?;

        let timestamp = Utc::now();
        self.emit(if replaced {
            QueueEvent::Updated {
                job: stored.clone(),
                timestamp,
            }
        } else {
            QueueEvent::Added {
                job: stored.clone(),
                timestamp,
            }
        });
        if synchronize {
            self.request_synchronization();
        }
        Ok(stored)
    }

    /// Remove a job, then request a synchronization pass. Removing an unknown
    /// id succeeds.
    pub async fn remove(&self, id: &JobId) -> Result<JobId, QueueError> {
        self.remove_with(id, true).await
    }

    pub async fn remove_with(&self, id: &JobId, synchronize: bool) -> Result<JobId, QueueError> {
        let removed = self
            .transaction(|tx| {
                let existing = match tx.get(id) {
                    Ok(job) => Some(job),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };
                tx.remove(id)?;
                Ok(existing)
            })
            .await?;

        if let Some(job) = removed {
            self.emit(QueueEvent::Removed {
                job,
                timestamp: Utc::now(),
            });
        }
        if synchronize {
            self.request_synchronization();
        }
        Ok(id.clone())
    }

    /// Remove every job of this queue. Returns what was removed.
    pub async fn remove_all(&self) -> Result<Vec<JobRecord>, QueueError> {
        let removed = self
            .transaction(|tx| {
                let jobs = tx.get_all()?;
                tx.remove_all()?;
                Ok(jobs)
            })
            .await?;

        for job in &removed {
            self.emit(QueueEvent::Removed {
                job: job.clone(),
                timestamp: Utc::now(),
            });
        }
        self.request_synchronization();
        Ok(removed)
    }

    /// Change a job's status.
    ///
    /// Setting the current status again changes nothing. Active jobs belong to
    /// their processor, so moving a job into or out of `active` is refused.
    pub async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<JobRecord, QueueError> {
        let (job, changed) = self.write_status(id, status, StatusWriter::Caller).await?;
        if changed {
            self.emit(QueueEvent::UpdatedStatus {
                job: job.clone(),
                timestamp: Utc::now(),
            });
            self.request_synchronization();
        }
        Ok(job)
    }

    /// Record progress. Progress never affects selection, so no pass is
    /// requested.
    pub async fn set_progress(
        &self,
        id: &JobId,
        progress: Option<f32>,
    ) -> Result<JobRecord, QueueError> {
        let job = self
            .transaction(|tx| {
                let mut job = tx.get(id)?;
                job.progress = progress;
                tx.store(job)
            })
            .await?;
        self.emit(QueueEvent::UpdatedProgress {
            job: job.clone(),
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    // Engine plumbing

    /// Write `status`, returning the stored job and whether anything changed.
    pub(crate) async fn write_status(
        &self,
        id: &JobId,
        status: JobStatus,
        writer: StatusWriter,
    ) -> Result<(JobRecord, bool), QueueError> {
        self.transaction(|tx| {
            let mut job = tx.get(id)?;
            if job.status == status {
                return Ok((job, false));
            }
            if writer == StatusWriter::Caller && (job.status.is_active() || status.is_active()) {
                return Err(QueueError::invalid_transition(id, &job.status, &status));
            }
            job.status = status;
            Ok((tx.store(job)?, true))
        })
        .await
    }

    /// Mark a selectable job active. `None` if its status changed since the
    /// pass read it.
    pub(crate) async fn activate_if_selectable(
        &self,
        id: &JobId,
    ) -> Result<Option<JobRecord>, QueueError> {
        self.transaction(|tx| {
            let mut job = tx.get(id)?;
            if !job.status.is_selectable() {
                return Ok(None);
            }
            job.status = JobStatus::Active;
            Ok(Some(tx.store(job)?))
        })
        .await
    }

    /// Put an active job back to waiting. `None` if it is not active.
    pub(crate) async fn reset_if_active(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        self.transaction(|tx| {
            let mut job = tx.get(id)?;
            if !job.status.is_active() {
                return Ok(None);
            }
            job.status = JobStatus::Waiting;
            Ok(Some(tx.store(job)?))
        })
        .await
    }

    fn request_synchronization(&self) {
        if let Err(e) = self.actor.send_message(QueueMessage::RequestSynchronize) {
            tracing::warn!(queue = %self.name, error = %e, "Failed to request synchronization");
        }
    }

    fn emit(&self, event: QueueEvent) {
        if let Err(e) = self.actor.send_message(QueueMessage::Broadcast { event }) {
            tracing::debug!(queue = %self.name, error = %e, "Dropped queue event");
        }
    }

    fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        self.actor
            .send_message(message)
            .map_err(|e| QueueError::QueueUnavailable(format!("queue {}: {e}", self.name)))
    }

    async fn call<T, F>(&self, message: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> QueueMessage,
    {
        match ractor::rpc::call(&self.actor, message, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(_) => Err(QueueError::QueueUnavailable(format!(
                "queue {} did not reply",
                self.name
            ))),
            Err(e) => Err(QueueError::QueueUnavailable(format!("queue {}: {e}", self.name))),
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("name", &self.name).finish()
    }
}

/// Who is writing a status. Only the engine may move jobs into or out of
/// `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusWriter {
    Caller,
    Engine,
}

fn exists(tx: &mut dyn JobStorageTransaction, id: &JobId) -> Result<bool, QueueError> {
    match tx.get(id) {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::InMemoryStorage;

    async fn queue() -> JobQueue {
        let name = format!("activate-{}", JobId::generate());
        JobQueue::start(name, Arc::new(InMemoryStorage::new()))
            .await
            .unwrap()
    }

    fn record(queue: &JobQueue, id: &str, status: JobStatus) -> JobRecord {
        JobRecord::new(JobId::new(id).unwrap(), "t", queue.name(), vec![]).with_status(status)
    }

    #[tokio::test]
    async fn activation_checks_the_stored_status() {
        let queue = queue().await;
        queue.store(record(&queue, "waiting", JobStatus::Waiting)).await.unwrap();
        queue.store(record(&queue, "paused", JobStatus::Paused)).await.unwrap();

        let waiting = JobId::new("waiting").unwrap();
        let activated = queue.activate_if_selectable(&waiting).await.unwrap();
        assert!(activated.is_some_and(|job| job.is_active()));
        assert!(queue.get(&waiting).await.unwrap().is_active());

        let paused = JobId::new("paused").unwrap();
        assert!(queue.activate_if_selectable(&paused).await.unwrap().is_none());
        assert!(queue.get(&paused).await.unwrap().status.is_paused());

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn activation_sees_a_status_set_after_the_pass_read() {
        let queue = queue().await;
        queue.store(record(&queue, "a", JobStatus::Waiting)).await.unwrap();
        let id = JobId::new("a").unwrap();
        let seen_by_pass = queue.get(&id).await.unwrap();
        assert!(seen_by_pass.status.is_selectable());

        queue.set_status(&id, JobStatus::Paused).await.unwrap();
        assert!(queue.activate_if_selectable(&id).await.unwrap().is_none());
        assert!(queue.get(&id).await.unwrap().status.is_paused());

        queue.shutdown().await.unwrap();
    }
}
