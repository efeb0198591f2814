//! Processor traits and adapters.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use queue_core::{CancellationReason, Job, JobId, JobRecord, QueueError};
use thiserror::Error;

use crate::cancellation::Cancellation;
use crate::queue::JobQueue;

/// Why a processor did not finish its job.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),
    #[error("processing cancelled: {0}")]
    Cancelled(CancellationReason),
    #[error("processor for {expected} received a {found} job")]
    InvalidJobType { expected: String, found: String },
    #[error(transparent)]
    Payload(#[from] QueueError),
}

impl ProcessError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result type for processors.
pub type ProcessResult = Result<(), ProcessError>;

/// Future type for async processors.
pub type ProcessFuture = Pin<Box<dyn Future<Output = ProcessResult> + Send>>;

/// What a processor gets alongside its job.
#[derive(Clone)]
pub struct ProcessContext {
    job_id: JobId,
    queue: JobQueue,
    cancellation: Cancellation,
}

impl ProcessContext {
    pub(crate) fn new(job_id: JobId, queue: JobQueue, cancellation: Cancellation) -> Self {
        Self {
            job_id,
            queue,
            cancellation,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// `Err(Cancelled)` once the engine asked this processor to stop.
    pub fn check_cancelled(&self) -> ProcessResult {
        match self.cancellation.reason() {
            Some(reason) => Err(ProcessError::Cancelled(reason)),
            None => Ok(()),
        }
    }

    /// Persist progress for the job being processed.
    pub async fn report_progress(&self, progress: f32) -> Result<JobRecord, QueueError> {
        self.queue.set_progress(&self.job_id, Some(progress)).await
    }
}

/// Processes jobs of one type. One instance is created per dispatched job.
///
/// The returned future must not borrow `self`; clone what it needs.
pub trait JobProcessor: Send + Sync + 'static {
    fn process(&self, job: JobRecord, ctx: ProcessContext) -> ProcessFuture;

    /// Called when the engine signals cancellation, in addition to the
    /// [`Cancellation`] in the context.
    fn cancel(&self, _reason: CancellationReason) {}
}

/// Processor bound to a typed [`Job`], receiving its decoded payload.
pub trait Processor: Default + Send + Sync + 'static {
    type Job: Job;

    fn process(
        &self,
        job: JobRecord,
        payload: <Self::Job as Job>::Payload,
        ctx: ProcessContext,
    ) -> ProcessFuture;
}

/// Adapts a [`Processor`] to the untyped [`JobProcessor`] interface.
pub struct TypedProcessor<P> {
    inner: P,
}

impl<P: Processor> TypedProcessor<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Processor> JobProcessor for TypedProcessor<P> {
    fn process(&self, job: JobRecord, ctx: ProcessContext) -> ProcessFuture {
        let expected = <P::Job as Job>::NAME;
        if job.job_type != expected {
            let err = ProcessError::InvalidJobType {
                expected: expected.to_string(),
                found: job.job_type,
            };
            return futures_util::future::ready(Err(err)).boxed();
        }
        match <P::Job as Job>::deserialize(&job.payload) {
            Ok(payload) => self.inner.process(job, payload, ctx),
            Err(e) => futures_util::future::ready(Err(ProcessError::Payload(e))).boxed(),
        }
    }
}

/// A closure-backed processor.
pub struct FnProcessor<F> {
    handler: Arc<F>,
}

impl<F> FnProcessor<F>
where
    F: Fn(JobRecord, ProcessContext) -> ProcessFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<F> Clone for FnProcessor<F> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(JobRecord, ProcessContext) -> ProcessFuture + Send + Sync + 'static,
{
    fn process(&self, job: JobRecord, ctx: ProcessContext) -> ProcessFuture {
        (self.handler)(job, ctx)
    }
}

/// Builds a fresh processor for each dispatched job.
#[derive(Clone)]
pub struct ProcessorFactory(Arc<dyn Fn() -> Box<dyn JobProcessor> + Send + Sync>);

impl ProcessorFactory {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn JobProcessor> + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    /// Factory for a typed processor built with `P::default()`.
    pub fn typed<P: Processor>() -> Self {
        Self::new(|| Box::new(TypedProcessor::new(P::default())) as Box<dyn JobProcessor>)
    }

    /// Factory sharing one closure across every instance.
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(JobRecord, ProcessContext) -> ProcessFuture + Send + Sync + 'static,
    {
        let processor = FnProcessor::new(handler);
        Self::new(move || Box::new(processor.clone()) as Box<dyn JobProcessor>)
    }

    /// A factory that panics yields a processor failing every job it gets.
    pub fn create(&self) -> Box<dyn JobProcessor> {
        std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)())).unwrap_or_else(|_| {
            tracing::warn!("Processor factory panicked");
            Box::new(Unbuildable)
        })
    }
}

struct Unbuildable;

impl JobProcessor for Unbuildable {
    fn process(&self, _job: JobRecord, _ctx: ProcessContext) -> ProcessFuture {
        futures_util::future::ready(Err(ProcessError::failed("processor factory panicked"))).boxed()
    }
}

impl std::fmt::Debug for ProcessorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProcessorFactory")
    }
}

