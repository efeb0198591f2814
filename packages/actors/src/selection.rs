//! Which jobs should be processing right now.

use std::collections::HashMap;

use queue_core::JobRecord;

use crate::pool::ProcessorPool;

/// Walk `sorted` in order and take, per job type, the first waiting or active
/// jobs up to that type's concurrency. Types without a configuration, or
/// configured with zero concurrency, get nothing.
pub(crate) fn select_jobs(sorted: &[JobRecord], pool: &ProcessorPool) -> Vec<JobRecord> {
    let mut taken: HashMap<&str, usize> = HashMap::new();
    let mut selected = Vec::new();

    for job in sorted {
        let Some(configuration) = pool.configuration(&job.job_type) else {
            continue;
        };
        if configuration.concurrency == 0 || !job.status.is_selectable() {
            continue;
        }
        let count = taken.entry(job.job_type.as_str()).or_default();
        if *count >= configuration.concurrency {
            continue;
        }
        *count += 1;
        selected.push(job.clone());
    }

    selected
}
