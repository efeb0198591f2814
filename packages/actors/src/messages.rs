//! Message types for the queue actor.

use queue_core::{JobId, QueueEvent, QueueState};
use ractor::RpcReplyPort;

use crate::processor::{ProcessResult, ProcessorFactory};

/// Messages for the QueueActor. Everything that touches engine state arrives
/// through this mailbox.
#[derive(Debug)]
pub enum QueueMessage {
    /// Activate the queue; replies with whether it was inactive before.
    Resume { reply: RpcReplyPort<bool> },

    /// Deactivate the queue; replies with whether it was active before.
    Suspend { reply: RpcReplyPort<bool> },

    /// Register or replace the processor configuration for a job type.
    Register {
        job_type: String,
        concurrency: usize,
        factory: ProcessorFactory,
    },

    /// A mutation asks for a synchronization pass.
    RequestSynchronize,

    /// Debounce timer fired. Stale generations are ignored.
    DebounceElapsed { generation: u64 },

    /// Run one synchronization pass.
    Synchronize,

    /// A dispatched processor returned.
    ProcessingFinished {
        job_id: JobId,
        instance: u64,
        result: ProcessResult,
    },

    /// Emit an event on behalf of a queue handle.
    Broadcast { event: QueueEvent },

    /// Get a snapshot of the synchronization state.
    GetState { reply: RpcReplyPort<QueueState> },

    /// Cancel every processor and stop the actor.
    Shutdown,
}
