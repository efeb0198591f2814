//! Queue engine built on ractor.
//!
//! Each running queue is a [`QueueActor`] that owns its synchronization
//! state and processor pool. Callers talk to it through a cloneable
//! [`JobQueue`] handle.
//!
//! # Architecture
//!
//! - `JobQueue` - Handle: storage mutations, lifecycle, events
//! - `QueueActor` - Debounced synchronization and dispatch
//! - `ProcessorPool` - Per-type concurrency for live processors
//! - `DelayPollingStrategy` - Returns elapsed delayed jobs to waiting
//!
//! # Usage
//!
//! ```ignore
//! use actors::JobQueue;
//! use queue_core::InMemoryStorage;
//!
//! let queue = JobQueue::start("mail", Arc::new(InMemoryStorage::new())).await?;
//! queue.register_processor::<SendMail>(4)?;
//! queue.store(JobRecord::typed::<SendMail>(JobId::generate(), "mail", &payload)?).await?;
//! queue.resume().await?;
//! ```

mod cancellation;
mod delay;
mod messages;
mod pool;
mod processor;
mod queue;
mod queue_actor;
pub mod registry;
mod selection;

pub use cancellation::Cancellation;
pub use delay::{DelayPollingStrategy, DelayStrategy};
pub use messages::QueueMessage;
pub use pool::{ActiveProcessor, ProcessorConfiguration, ProcessorPool};
pub use processor::{
    FnProcessor, JobProcessor, ProcessContext, ProcessError, ProcessFuture, ProcessResult,
    Processor, ProcessorFactory, TypedProcessor,
};
pub use queue::{JobQueue, QueueBuilder};
pub use queue_actor::{QueueActor, QueueActorArgs, QueueActorState};
pub use registry::{QueueRegistry, global_registry};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
