#![allow(clippy::disallowed_methods)]

use std::error::Error;

use queue_core::{JobId, JobRecord, JobStatus, JobStorageExt, QueueError};
use storage::{ObjectStoreStorage, StoreConfig, StoreKind};

fn record(queue: &str, id: &str) -> JobRecord {
    JobRecord::new(JobId::new(id).unwrap(), "upload", queue, b"[42]".to_vec())
}

#[tokio::test]
async fn in_memory_commit_and_rollback() -> Result<(), Box<dyn Error>> {
    let storage = ObjectStoreStorage::new(StoreConfig::memory()).await?;
    assert_eq!(storage.kind(), StoreKind::Memory);

    storage
        .transaction("uploads", |tx| {
            tx.store(record("uploads", "b"))?;
            tx.store(record("uploads", "a").with_status(JobStatus::Paused))
        })
        .await?;

    let rolled_back: Result<(), QueueError> = storage
        .transaction("uploads", |tx| {
            tx.remove(&JobId::new("a")?)?;
            Err(QueueError::InvalidConfiguration("abort".into()))
        })
        .await;
    assert!(rolled_back.is_err());

    let document = storage.read_document("uploads").await?.expect("document");
    let ids: Vec<&str> = document.jobs.iter().map(|job| job.id.as_str()).collect();
    assert_eq!(ids, ["a", "b"]);
    assert!(document.jobs[0].status.is_paused());
    Ok(())
}

#[tokio::test]
async fn filesystem_documents_survive_reopening() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::filesystem(dir.path()).with_prefix("app");

    let first = ObjectStoreStorage::new(config.clone()).await?;
    first
        .transaction("reports", |tx| tx.store(record("reports", "weekly")))
        .await?;
    assert_eq!(
        first.document_path("reports").to_string(),
        "app/queues/reports.json"
    );
    assert!(dir.path().join("app/queues/reports.json").exists());

    let reopened = ObjectStoreStorage::new(config).await?;
    let job = reopened
        .transaction("reports", |tx| tx.get(&JobId::new("weekly")?))
        .await?;
    assert_eq!(job.job_type, "upload");
    Ok(())
}

#[tokio::test]
async fn remove_all_deletes_the_document() -> Result<(), Box<dyn Error>> {
    let storage = ObjectStoreStorage::new(StoreConfig::memory()).await?;
    storage
        .transaction("q", |tx| tx.store(record("q", "only")))
        .await?;

    storage.transaction("q", |tx| tx.remove_all()).await?;
    assert!(storage.read_document("q").await?.is_none());

    let err = storage
        .transaction("q", |tx| tx.get(&JobId::new("only")?))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::QueueNotFound(_)));
    assert!(storage.transaction("q", |tx| tx.get_all()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn queues_do_not_share_documents() -> Result<(), Box<dyn Error>> {
    let storage = ObjectStoreStorage::new(StoreConfig::memory()).await?;
    storage
        .transaction("left", |tx| tx.store(record("left", "x")))
        .await?;

    let err = storage
        .transaction("right", |tx| tx.get(&JobId::new("x")?))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = storage.transaction("", |tx| tx.get_all()).await.unwrap_err();
    assert!(matches!(err, QueueError::NoQueueContext));
    Ok(())
}
