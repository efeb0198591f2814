//! Queue actor: the single task that owns a queue's synchronization state.
//!
//! Mutations on a [`JobQueue`] request a synchronization pass. Requests are
//! coalesced while one is pending, and a debounce timer turns the pending
//! request into a pass once the quiet period has elapsed. The timer is only
//! armed while the queue is active and no pass is running, so requests made
//! while suspended or mid-pass are deferred rather than dropped.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use queue_core::{
    CancellationReason, JobId, JobRecord, JobSorter, JobStatus, JobStorage, QueueConfig,
    QueueEvent, QueueState,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::delay::DelayStrategy;
use crate::messages::QueueMessage;
use crate::pool::{ActiveProcessor, ProcessorPool};
use crate::processor::{ProcessContext, ProcessError, ProcessResult};
use crate::queue::{JobQueue, StatusWriter};
use crate::selection::select_jobs;

/// Everything needed to start a queue actor.
pub struct QueueActorArgs {
    pub name: String,
    pub storage: Arc<dyn JobStorage>,
    pub events: broadcast::Sender<QueueEvent>,
    pub config: QueueConfig,
    pub sorter: Arc<dyn JobSorter>,
    pub delay_strategy: Arc<dyn DelayStrategy>,
}

/// State for the queue actor.
pub struct QueueActorState {
    queue: JobQueue,
    events: broadcast::Sender<QueueEvent>,
    debounce: Duration,
    sorter: Arc<dyn JobSorter>,
    delay_strategy: Arc<dyn DelayStrategy>,
    processors: ProcessorPool,
    is_active: bool,
    is_synchronizing: bool,
    is_synchronize_pending: bool,
    debounce_armed: bool,
    /// Bumped whenever a timer is armed or invalidated.
    debounce_generation: u64,
}

impl QueueActorState {
    fn new(queue: JobQueue, args: QueueActorArgs) -> Self {
        Self {
            queue,
            events: args.events,
            debounce: args.config.debounce(),
            sorter: args.sorter,
            delay_strategy: args.delay_strategy,
            processors: ProcessorPool::new(),
            is_active: false,
            is_synchronizing: false,
            is_synchronize_pending: false,
            debounce_armed: false,
            debounce_generation: 0,
        }
    }

    fn name(&self) -> &str {
        self.queue.name()
    }

    fn broadcast(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> QueueState {
        QueueState {
            name: self.name().to_string(),
            is_active: self.is_active,
            is_synchronizing: self.is_synchronizing,
            is_synchronize_pending: self.is_synchronize_pending,
            active_processors: self.processors.active_count(),
        }
    }

    // Trigger protocol

    fn request_synchronization(&mut self, myself: &ActorRef<QueueMessage>) {
        if !self.is_synchronize_pending {
            self.is_synchronize_pending = true;
            tracing::trace!(queue = self.name(), "Synchronization requested");
        }
        self.arm_debounce(myself);
    }

    fn arm_debounce(&mut self, myself: &ActorRef<QueueMessage>) {
        if !self.is_synchronize_pending
            || !self.is_active
            || self.is_synchronizing
            || self.debounce_armed
        {
            return;
        }

        self.debounce_armed = true;
        self.debounce_generation += 1;
        let generation = self.debounce_generation;
        let delay = self.debounce;
        let myself = myself.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = myself.send_message(QueueMessage::DebounceElapsed { generation });
        });
    }

    fn disarm_debounce(&mut self) {
        self.debounce_armed = false;
        self.debounce_generation += 1;
    }

    fn debounce_elapsed(&mut self, generation: u64, myself: &ActorRef<QueueMessage>) {
        if generation != self.debounce_generation {
            return;
        }
        self.debounce_armed = false;
        if !self.is_synchronize_pending || !self.is_active || self.is_synchronizing {
            return;
        }

        self.is_synchronize_pending = false;
        self.is_synchronizing = true;
        if let Err(e) = myself.send_message(QueueMessage::Synchronize) {
            tracing::warn!(queue = self.name(), error = %e, "Failed to start synchronization");
            self.is_synchronizing = false;
        }
    }

    fn set_active(&mut self, active: bool, myself: &ActorRef<QueueMessage>) -> bool {
        if self.is_active == active {
            return false;
        }
        self.is_active = active;
        let timestamp = Utc::now();

        if active {
            tracing::info!(queue = self.name(), "Resumed queue");
            self.broadcast(QueueEvent::Resumed {
                queue: self.name().to_string(),
                timestamp,
            });
            self.request_synchronization(myself);
        } else {
            tracing::info!(queue = self.name(), "Suspended queue");
            self.disarm_debounce();
            self.broadcast(QueueEvent::Suspended {
                queue: self.name().to_string(),
                timestamp,
            });
            self.cancel_all(CancellationReason::QueueSuspended);
        }
        true
    }

    /// Signal every live processor. They stay in the pool until they return.
    fn cancel_all(&self, reason: CancellationReason) {
        let live: Vec<ActiveProcessor> = self
            .processors
            .iter()
            .filter(|processor| !processor.is_cancelled())
            .cloned()
            .collect();
        for processor in live {
            processor.cancel(reason);
            self.broadcast(QueueEvent::CancelledProcessing {
                queue: self.name().to_string(),
                job: Some(processor.job),
                reason,
                timestamp: Utc::now(),
            });
        }
    }

    // Synchronization pass

    async fn synchronize(&mut self, myself: &ActorRef<QueueMessage>) {
        let jobs = match self.queue.get_all().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(queue = self.name(), error = %e, "Failed to load jobs for synchronization");
                return;
            }
        };
        let sorted = self.sorter.sort(jobs);
        let selected = select_jobs(&sorted, &self.processors);
        let selected_ids: HashSet<JobId> = selected.iter().map(|job| job.id.clone()).collect();

        let to_cancel = self.processors.active_excluding(&selected_ids);
        for (id, processor) in &to_cancel {
            let job = sorted.iter().find(|job| &job.id == id);
            let reason = job.map_or(CancellationReason::Removed, |job| {
                CancellationReason::for_deselected(&job.status)
            });
            tracing::debug!(queue = self.name(), job_id = %id, %reason, "Cancelling processor");
            processor.cancel(reason);
            self.broadcast(QueueEvent::CancelledProcessing {
                queue: self.name().to_string(),
                job: job.cloned(),
                reason,
                timestamp: Utc::now(),
            });
        }
        self.processors.release(to_cancel.keys());

        let delayed: Vec<JobRecord> = sorted.iter().filter(|job| job.is_delayed()).cloned().collect();
        self.delay_strategy.update(&self.queue, &delayed);

        let selected_count = selected.len();
        let mut dispatched = 0usize;
        for job in selected {
            if self.processors.is_busy(&job) {
                continue;
            }
            if self.begin_processing(job, myself).await {
                dispatched += 1;
            }
        }

        tracing::debug!(
            queue = self.name(),
            jobs = sorted.len(),
            selected = selected_count,
            cancelled = to_cancel.len(),
            dispatched,
            "Synchronized queue"
        );
    }

    async fn begin_processing(&mut self, job: JobRecord, myself: &ActorRef<QueueMessage>) -> bool {
        let job = match self.queue.activate_if_selectable(&job.id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(queue = self.name(), job_id = %job.id, "Job changed before dispatch");
                return false;
            }
            Err(e) => {
                tracing::warn!(queue = self.name(), job_id = %job.id, error = %e, "Failed to activate job");
                return false;
            }
        };
        self.status_changed(&job, myself);

        let Some(processor) = self.processors.acquire(&job) else {
            tracing::debug!(queue = self.name(), job_id = %job.id, "No processor available");
            self.return_to_waiting(&job.id, myself).await;
            return false;
        };

        let ctx = ProcessContext::new(
            job.id.clone(),
            self.queue.clone(),
            processor.cancellation().clone(),
        );
        let handler = Arc::clone(processor.processor());
        let record = job.clone();
        let instance = processor.instance;
        let reply_to = myself.clone();
        tokio::spawn(async move {
            let job_id = record.id.clone();
            // `process` itself runs inside the guarded future.
            let work = async move { handler.process(record, ctx).await };
            let result = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ProcessError::failed("processor panicked")));
            if reply_to
                .send_message(QueueMessage::ProcessingFinished {
                    job_id,
                    instance,
                    result,
                })
                .is_err()
            {
                tracing::debug!("Queue stopped before processor completion was delivered");
            }
        });

        tracing::info!(
            queue = self.name(),
            job_id = %job.id,
            job_type = %job.job_type,
            "Began processing"
        );
        self.broadcast(QueueEvent::BeganProcessing {
            job,
            timestamp: Utc::now(),
        });
        true
    }

    fn status_changed(&mut self, job: &JobRecord, myself: &ActorRef<QueueMessage>) {
        self.broadcast(QueueEvent::UpdatedStatus {
            job: job.clone(),
            timestamp: Utc::now(),
        });
        self.request_synchronization(myself);
    }

    // Completion

    async fn finish_processing(
        &mut self,
        job_id: JobId,
        instance: u64,
        result: ProcessResult,
        myself: &ActorRef<QueueMessage>,
    ) {
        let Some(processor) = self
            .processors
            .get(&job_id)
            .filter(|processor| processor.instance == instance)
            .cloned()
        else {
            self.finish_stale(job_id, result, myself).await;
            return;
        };
        self.processors.release([&job_id]);

        match result {
            Err(ProcessError::Cancelled(reason)) if processor.is_cancelled() => {
                tracing::debug!(queue = self.name(), job_id = %job_id, %reason, "Processor stopped after cancellation");
                self.return_to_waiting(&job_id, myself).await;
            }
            Ok(()) => self.record_success(&job_id, myself).await,
            Err(error) => self.record_failure(&job_id, error, myself).await,
        }
    }

    /// Completion from a processor that was already released.
    async fn finish_stale(
        &mut self,
        job_id: JobId,
        result: ProcessResult,
        myself: &ActorRef<QueueMessage>,
    ) {
        if self.processors.get(&job_id).is_some() {
            tracing::debug!(queue = self.name(), job_id = %job_id, "Ignoring completion from replaced processor");
            return;
        }
        match self.queue.get(&job_id).await {
            Ok(job) if job.is_active() => {}
            _ => {
                tracing::debug!(queue = self.name(), job_id = %job_id, "Discarding completion of released job");
                return;
            }
        }
        match result {
            Ok(()) => self.record_success(&job_id, myself).await,
            Err(_) => self.return_to_waiting(&job_id, myself).await,
        }
    }

    async fn record_success(&mut self, job_id: &JobId, myself: &ActorRef<QueueMessage>) {
        match self
            .queue
            .write_status(job_id, JobStatus::completed_now(), StatusWriter::Engine)
            .await
        {
            Ok((job, _)) => {
                tracing::info!(queue = self.name(), job_id = %job_id, "Finished processing");
                self.status_changed(&job, myself);
                self.broadcast(QueueEvent::FinishedProcessing {
                    job,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::debug!(queue = self.name(), job_id = %job_id, error = %e, "Finished job is gone");
                self.request_synchronization(myself);
            }
        }
    }

    async fn record_failure(
        &mut self,
        job_id: &JobId,
        error: ProcessError,
        myself: &ActorRef<QueueMessage>,
    ) {
        let message = error.to_string();
        match self
            .queue
            .write_status(job_id, JobStatus::failed_now(message.clone()), StatusWriter::Engine)
            .await
        {
            Ok((job, _)) => {
                tracing::warn!(queue = self.name(), job_id = %job_id, error = %message, "Processing failed");
                self.status_changed(&job, myself);
                self.broadcast(QueueEvent::FailedProcessing {
                    job,
                    error: message,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::debug!(queue = self.name(), job_id = %job_id, error = %e, "Failed job is gone");
                self.request_synchronization(myself);
            }
        }
    }

    async fn return_to_waiting(&mut self, job_id: &JobId, myself: &ActorRef<QueueMessage>) {
        match self.queue.reset_if_active(job_id).await {
            Ok(Some(job)) => self.status_changed(&job, myself),
            Ok(None) => self.request_synchronization(myself),
            Err(e) => {
                tracing::debug!(queue = self.name(), job_id = %job_id, error = %e, "Cancelled job is gone");
                self.request_synchronization(myself);
            }
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(queue = self.name(), "Shutting down queue");
        self.is_active = false;
        self.disarm_debounce();
        self.cancel_all(CancellationReason::QueueSuspended);
        self.delay_strategy.stop(self.queue.name());
    }
}

/// Queue actor; one per running queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.name);
        let queue = JobQueue::from_parts(
            args.name.as_str(),
            Arc::clone(&args.storage),
            myself,
            args.events.clone(),
        );
        Ok(QueueActorState::new(queue, args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Resume { reply } => {
                let changed = state.set_active(true, &myself);
                let _ = reply.send(changed);
            }

            QueueMessage::Suspend { reply } => {
                let changed = state.set_active(false, &myself);
                let _ = reply.send(changed);
            }

            QueueMessage::Register {
                job_type,
                concurrency,
                factory,
            } => {
                tracing::info!(queue = state.name(), %job_type, concurrency, "Registered processor");
                state.processors.register(job_type.clone(), concurrency, factory);
                state.broadcast(QueueEvent::RegisteredProcessor {
                    queue: state.name().to_string(),
                    job_type,
                    concurrency,
                    timestamp: Utc::now(),
                });
                state.request_synchronization(&myself);
            }

            QueueMessage::RequestSynchronize => {
                state.request_synchronization(&myself);
            }

            QueueMessage::DebounceElapsed { generation } => {
                state.debounce_elapsed(generation, &myself);
            }

            QueueMessage::Synchronize => {
                if !state.is_synchronizing {
                    return Ok(());
                }
                state.synchronize(&myself).await;
                state.is_synchronizing = false;
                state.arm_debounce(&myself);
            }

            QueueMessage::ProcessingFinished {
                job_id,
                instance,
                result,
            } => {
                state
                    .finish_processing(job_id, instance, result, &myself)
                    .await;
            }

            QueueMessage::Broadcast { event } => {
                state.broadcast(event);
            }

            QueueMessage::GetState { reply } => {
                let _ = reply.send(state.snapshot());
            }

            QueueMessage::Shutdown => {
                state.shutdown();
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }
}
