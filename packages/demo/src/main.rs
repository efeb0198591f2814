//! Runs a queue end to end: registers demo processors, enqueues a batch of
//! jobs and streams queue events until the batch drains.
//!
//! `JOBQUEUE_BACKEND` picks storage: `memory` (default), `surreal` or
//! `object`. Log verbosity follows `RUST_LOG`.

mod processors;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::JobQueue;
use chrono::Utc;
use queue_core::{
    InMemoryStorage, JobId, JobRecord, JobStatus, JobStorage, QueueConfig, QueueEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use processors::{Echo, EchoProcessor, Sleep, SleepProcessor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let storage = open_storage().await?;
    let queue = JobQueue::builder("demo", storage)
        .with_config(QueueConfig::from_env()?)
        .start()
        .await?;
    let mut events = queue.subscribe();

    queue.register_processor::<EchoProcessor>(2)?;
    queue.register_processor::<SleepProcessor>(1)?;
    queue.register_fn("fail", 1, processors::fail)?;

    enqueue_batch(&queue).await?;
    queue.resume().await?;

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::info!(target: "demo::events", "{}", format_event(&event));
                    if matches!(
                        event,
                        QueueEvent::FinishedProcessing { .. } | QueueEvent::FailedProcessing { .. }
                    ) && queue.stats().await?.outstanding() == 0
                    {
                        return Ok::<_, queue_core::QueueError>(());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    })
    .await;

    match drained {
        Ok(result) => result?,
        Err(_) => tracing::warn!("Timed out waiting for the batch to drain"),
    }

    let stats = queue.stats().await?;
    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        "Demo batch finished"
    );
    queue.shutdown().await?;
    Ok(())
}

async fn open_storage() -> Result<Arc<dyn JobStorage>, Box<dyn Error>> {
    let backend = std::env::var("JOBQUEUE_BACKEND").unwrap_or_else(|_| "memory".to_string());
    tracing::info!(backend = %backend, "Opening job storage");

    let storage: Arc<dyn JobStorage> = match backend.as_str() {
        "memory" => Arc::new(InMemoryStorage::new()),
        "surreal" => Arc::new(db::SurrealStorage::connect(&db::DbConfig::from_env()).await?),
        "object" => Arc::new(storage::ObjectStoreStorage::from_env().await?),
        other => {
            return Err(
                format!("unsupported JOBQUEUE_BACKEND={other} (expected memory|surreal|object)")
                    .into(),
            );
        }
    };
    Ok(storage)
}

async fn enqueue_batch(queue: &JobQueue) -> Result<(), Box<dyn Error>> {
    for (order, message) in ["first", "second", "third"].into_iter().enumerate() {
        let job = JobRecord::typed::<Echo>(
            JobId::generate(),
            queue.name(),
            &message.to_string(),
        )?
        .with_order(order as f32);
        queue.store(job).await?;
    }

    let nap = JobRecord::typed::<Sleep>(JobId::generate(), queue.name(), &1)?;
    queue.store(nap).await?;

    let later = JobRecord::typed::<Echo>(JobId::generate(), queue.name(), &"delayed".to_string())?
        .with_status(JobStatus::Delayed {
            until: Utc::now() + chrono::Duration::seconds(2),
        });
    queue.store(later).await?;

    let doomed = JobRecord::new(JobId::generate(), "fail", queue.name(), b"[null]".to_vec());
    queue.store(doomed).await?;
    Ok(())
}

/// One line per event, as server-sent-event style JSON.
fn format_event(event: &QueueEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("{}: {json}", event.description())
}
