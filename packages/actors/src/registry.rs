//! Process-wide registry of running queues.

use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use queue_core::QueueError;

use crate::queue::JobQueue;

/// Looks up running queues by name.
///
/// A queue name has a single owner per process: starting a queue whose name
/// is still running fails.
#[derive(Default)]
pub struct QueueRegistry {
    queues: RwLock<HashMap<String, JobQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue: JobQueue) {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.name().to_string(), queue);
    }

    pub fn unregister(&self, name: &str) -> Option<JobQueue> {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// The running queue called `name`.
    pub fn lookup(&self, name: &str) -> Result<JobQueue, QueueError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .filter(|queue| queue.is_running())
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    /// Names of all running queues.
    pub fn names(&self) -> Vec<String> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, queue)| queue.is_running())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

static REGISTRY: LazyLock<QueueRegistry> = LazyLock::new(QueueRegistry::new);

/// Get the global queue registry.
pub fn global_registry() -> &'static QueueRegistry {
    &REGISTRY
}
