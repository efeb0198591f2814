#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use actors::JobQueue;
use queue_core::{InMemoryStorage, JobId, JobRecord, QueueConfig, QueueEvent};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> QueueConfig {
    QueueConfig::default()
        .with_debounce(Duration::from_millis(20))
        .with_delay_poll_interval(Duration::from_millis(100))
}

/// Start a suspended queue with a unique name over fresh in-memory storage.
pub async fn start_queue() -> (JobQueue, Receiver<QueueEvent>) {
    let name = format!("test-{}", JobId::generate());
    let queue = JobQueue::builder(name, Arc::new(InMemoryStorage::new()))
        .with_config(test_config())
        .start()
        .await
        .expect("queue should start");
    let events = queue.subscribe();
    (queue, events)
}

pub fn job(queue: &JobQueue, job_type: &str, id: &str) -> JobRecord {
    JobRecord::new(JobId::new(id).unwrap(), job_type, queue.name(), vec![])
}

pub fn id(value: &str) -> JobId {
    JobId::new(value).unwrap()
}

/// Wait for the first event matching `predicate`, skipping the rest.
pub async fn wait_for<F>(events: &mut Receiver<QueueEvent>, mut predicate: F) -> QueueEvent
where
    F: FnMut(&QueueEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything emitted within `window`.
pub async fn drain_for(events: &mut Receiver<QueueEvent>, window: Duration) -> Vec<QueueEvent> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Ok(event) = events.recv().await {
            seen.push(event);
        }
    })
    .await;
    seen
}

pub fn is_began(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::BeganProcessing { .. })
}

pub fn is_finished(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::FinishedProcessing { .. })
}

pub fn is_terminal(event: &QueueEvent) -> bool {
    matches!(
        event,
        QueueEvent::FinishedProcessing { .. } | QueueEvent::FailedProcessing { .. }
    )
}

pub fn about(event: &QueueEvent, id: &str) -> bool {
    event.job_id().is_some_and(|job_id| job_id.as_str() == id)
}
