//! Per-type registry of live processors.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use queue_core::{CancellationReason, JobId, JobRecord};

use crate::cancellation::Cancellation;
use crate::processor::{JobProcessor, ProcessorFactory};

/// Concurrency limit and factory registered for a job type.
#[derive(Debug, Clone)]
pub struct ProcessorConfiguration {
    pub concurrency: usize,
    pub factory: ProcessorFactory,
}

/// A processor bound to one job.
#[derive(Clone)]
pub struct ActiveProcessor {
    /// Distinguishes successive processors created for the same job id.
    pub instance: u64,
    pub job: JobRecord,
    processor: Arc<dyn JobProcessor>,
    cancellation: Cancellation,
}

impl ActiveProcessor {
    pub fn processor(&self) -> &Arc<dyn JobProcessor> {
        &self.processor
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn cancel(&self, reason: CancellationReason) {
        self.cancellation.cancel(reason);
        let processor = &self.processor;
        if std::panic::catch_unwind(AssertUnwindSafe(|| processor.cancel(reason))).is_err() {
            tracing::warn!(job_id = %self.job.id, %reason, "Processor panicked while cancelling");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for ActiveProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveProcessor")
            .field("instance", &self.instance)
            .field("job_id", &self.job.id)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

/// Enforces per-type concurrency. Owned by the queue actor, so it is only
/// ever touched from one task.
#[derive(Debug, Default)]
pub struct ProcessorPool {
    configurations: HashMap<String, ProcessorConfiguration>,
    active: HashMap<String, HashMap<JobId, ActiveProcessor>>,
    next_instance: u64,
}

impl ProcessorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any earlier configuration for `job_type`. A concurrency of
    /// zero disables the type without unregistering it.
    pub fn register(&mut self, job_type: impl Into<String>, concurrency: usize, factory: ProcessorFactory) {
        self.configurations.insert(
            job_type.into(),
            ProcessorConfiguration {
                concurrency,
                factory,
            },
        );
    }

    pub fn configuration(&self, job_type: &str) -> Option<&ProcessorConfiguration> {
        self.configurations.get(job_type)
    }

    /// Processor for `job`, creating one if the type has spare capacity.
    ///
    /// Re-acquiring a job that already has a processor returns that same
    /// processor.
    pub fn acquire(&mut self, job: &JobRecord) -> Option<ActiveProcessor> {
        let configuration = self.configurations.get(&job.job_type)?;
        let active = self.active.entry(job.job_type.clone()).or_default();

        if let Some(existing) = active.get(&job.id) {
            return Some(existing.clone());
        }
        if active.len() >= configuration.concurrency {
            return None;
        }

        self.next_instance += 1;
        let processor = ActiveProcessor {
            instance: self.next_instance,
            job: job.clone(),
            processor: Arc::from(configuration.factory.create()),
            cancellation: Cancellation::new(),
        };
        active.insert(job.id.clone(), processor.clone());
        Some(processor)
    }

    /// Every live processor whose job id is not in `ids`.
    pub fn active_excluding(&self, ids: &HashSet<JobId>) -> HashMap<JobId, ActiveProcessor> {
        self.active
            .values()
            .flat_map(|by_id| by_id.iter())
            .filter(|(id, _)| !ids.contains(*id))
            .map(|(id, processor)| (id.clone(), processor.clone()))
            .collect()
    }

    pub fn release<'a>(&mut self, ids: impl IntoIterator<Item = &'a JobId>) {
        let ids: HashSet<&JobId> = ids.into_iter().collect();
        for by_id in self.active.values_mut() {
            by_id.retain(|id, _| !ids.contains(id));
        }
        self.active.retain(|_, by_id| !by_id.is_empty());
    }

    pub fn is_busy(&self, job: &JobRecord) -> bool {
        self.active
            .get(&job.job_type)
            .is_some_and(|by_id| by_id.contains_key(&job.id))
    }

    /// Live processor for `id`, whatever its type.
    pub fn get(&self, id: &JobId) -> Option<&ActiveProcessor> {
        self.active.values().find_map(|by_id| by_id.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveProcessor> {
        self.active.values().flat_map(|by_id| by_id.values())
    }

    pub fn active_count(&self) -> usize {
        self.active.values().map(HashMap::len).sum()
    }

    pub fn active_count_for(&self, job_type: &str) -> usize {
        self.active.get(job_type).map_or(0, HashMap::len)
    }
}
