#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{
    DelayStrategy, JobProcessor, JobQueue, ProcessContext, ProcessError, ProcessFuture, Processor,
    ProcessorFactory, global_registry,
};
use chrono::Utc;
use futures_util::FutureExt;
use queue_core::{
    CancellationReason, InMemoryStorage, Job, JobId, JobRecord, JobStatus, QueueError, QueueEvent,
};
use tokio::sync::Notify;

use common::{
    about, drain_for, id, is_began, is_finished, is_terminal, job, start_queue, test_config,
    wait_for,
};

fn quick(_job: JobRecord, _ctx: ProcessContext) -> ProcessFuture {
    async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }
    .boxed()
}

/// Waits for cancellation, then reports success anyway.
fn until_cancelled(_job: JobRecord, ctx: ProcessContext) -> ProcessFuture {
    async move {
        ctx.cancellation().cancelled().await;
        Ok(())
    }
    .boxed()
}

#[tokio::test]
async fn processes_in_sort_order_one_at_a_time() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("work", 1, quick)?;

    queue.store(job(&queue, "work", "c").with_order(2.0)).await?;
    queue.store(job(&queue, "work", "a").with_order(0.0)).await?;
    queue.store(job(&queue, "work", "b").with_order(1.0)).await?;
    assert!(queue.resume().await?);

    let mut trace = Vec::new();
    while trace.iter().filter(|(kind, _)| *kind == "finished").count() < 3 {
        let event = wait_for(&mut events, |e| is_began(e) || is_finished(e)).await;
        let kind = if is_began(&event) { "began" } else { "finished" };
        trace.push((kind, event.job_id().map(|id| id.to_string()).unwrap_or_default()));
    }

    let expected: Vec<(&str, String)> = ["a", "b", "c"]
        .iter()
        .flat_map(|id| [("began", id.to_string()), ("finished", id.to_string())])
        .collect();
    assert_eq!(trace, expected);

    let stats = queue.stats().await?;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.outstanding(), 0);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn delayed_job_runs_after_its_deadline() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("work", 1, quick)?;

    let until = Utc::now() + chrono::Duration::milliseconds(600);
    queue
        .store(job(&queue, "work", "later").with_status(JobStatus::Delayed { until }))
        .await?;
    queue.resume().await?;

    let began = wait_for(&mut events, is_began).await;
    assert!(about(&began, "later"));
    assert!(began.timestamp() >= until);

    wait_for(&mut events, |e| is_finished(e) && about(e, "later")).await;
    assert!(queue.get(&id("later")).await?.is_complete());

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn removing_a_running_job_cancels_without_finishing() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("work", 1, until_cancelled)?;

    queue.store(job(&queue, "work", "doomed")).await?;
    queue.resume().await?;
    wait_for(&mut events, |e| is_began(e) && about(e, "doomed")).await;

    queue.remove(&id("doomed")).await?;
    let cancelled = wait_for(&mut events, |e| {
        matches!(e, QueueEvent::CancelledProcessing { .. })
    })
    .await;
    match cancelled {
        QueueEvent::CancelledProcessing { job, reason, .. } => {
            assert!(job.is_none());
            assert_eq!(reason, CancellationReason::Removed);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let later = drain_for(&mut events, Duration::from_millis(300)).await;
    assert!(!later.iter().any(|e| is_terminal(e) && about(e, "doomed")));
    assert_eq!(queue.state().await?.active_processors, 0);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn suspend_cancels_in_flight_work_and_holds_new_work() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    let gate = Arc::new(Notify::new());
    let release = Arc::clone(&gate);
    queue.register_fn("work", 1, move |job: JobRecord, _ctx: ProcessContext| -> ProcessFuture {
        let gate = Arc::clone(&gate);
        async move {
            if job.id.as_str() == "first" {
                gate.notified().await;
            }
            Ok(())
        }
        .boxed()
    })?;

    queue.store(job(&queue, "work", "first").with_order(0.0)).await?;
    queue.store(job(&queue, "work", "second").with_order(1.0)).await?;
    queue.resume().await?;
    wait_for(&mut events, |e| is_began(e) && about(e, "first")).await;

    assert!(queue.suspend().await?);
    assert!(!queue.suspend().await?);
    let cancelled = wait_for(&mut events, |e| {
        matches!(e, QueueEvent::CancelledProcessing { .. })
    })
    .await;
    match &cancelled {
        QueueEvent::CancelledProcessing { reason, .. } => {
            assert_eq!(*reason, CancellationReason::QueueSuspended);
            assert!(about(&cancelled, "first"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    release.notify_one();
    wait_for(&mut events, |e| is_finished(e) && about(e, "first")).await;

    let idle = drain_for(&mut events, Duration::from_millis(300)).await;
    assert!(!idle.iter().any(is_began));
    assert!(queue.get(&id("second")).await?.status.is_waiting());

    assert!(queue.resume().await?);
    wait_for(&mut events, |e| is_finished(e) && about(e, "second")).await;

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn higher_priority_job_displaces_running_one() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("work", 1, move |job: JobRecord, ctx: ProcessContext| -> ProcessFuture {
        async move {
            if job.id.as_str() == "slow" {
                ctx.cancellation().cancelled().await;
                return ctx.check_cancelled();
            }
            Ok(())
        }
        .boxed()
    })?;

    queue.store(job(&queue, "work", "slow").with_order(5.0)).await?;
    queue.resume().await?;
    wait_for(&mut events, |e| is_began(e) && about(e, "slow")).await;

    queue.store(job(&queue, "work", "urgent").with_order(1.0)).await?;
    let cancelled = wait_for(&mut events, |e| {
        matches!(e, QueueEvent::CancelledProcessing { .. })
    })
    .await;
    match &cancelled {
        QueueEvent::CancelledProcessing { reason, .. } => {
            assert_eq!(*reason, CancellationReason::StatusChangedToWaiting);
            assert!(about(&cancelled, "slow"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    wait_for(&mut events, |e| is_finished(e) && about(e, "urgent")).await;
    // The displaced job goes back to waiting and runs once it is selected again.
    wait_for(&mut events, |e| is_began(e) && about(e, "slow")).await;

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn failures_and_panics_mark_the_job_failed() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("boom", 2, |job: JobRecord, _ctx: ProcessContext| -> ProcessFuture {
        async move {
            if job.id.as_str() == "panics" {
                panic!("processor blew up");
            }
            Err(ProcessError::failed("disk full"))
        }
        .boxed()
    })?;

    queue.store(job(&queue, "boom", "errors")).await?;
    queue.store(job(&queue, "boom", "panics")).await?;
    queue.resume().await?;

    for _ in 0..2 {
        let failed = wait_for(&mut events, |e| {
            matches!(e, QueueEvent::FailedProcessing { .. })
        })
        .await;
        let QueueEvent::FailedProcessing { job, error, .. } = failed else {
            panic!("expected a failure event");
        };
        let stored = queue.get(&job.id).await?;
        assert!(stored.is_failed());
        assert_eq!(stored.failed_message(), Some(error.as_str()));
    }
    assert_eq!(
        queue.get(&id("errors")).await?.failed_message(),
        Some("disk full")
    );
    assert_eq!(
        queue.get(&id("panics")).await?.failed_message(),
        Some("processor panicked")
    );

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn processor_that_panics_before_returning_a_future_fails_its_job() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_fn("eager", 1, |_job: JobRecord, _ctx: ProcessContext| -> ProcessFuture {
        panic!("panicked while building the future")
    })?;
    queue.register(
        "unbuildable",
        1,
        ProcessorFactory::new(|| -> Box<dyn JobProcessor> { panic!("factory blew up") }),
    )?;

    queue.store(job(&queue, "eager", "eager")).await?;
    queue.store(job(&queue, "unbuildable", "unbuildable")).await?;
    queue.resume().await?;

    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, QueueEvent::FailedProcessing { .. })).await;
    }
    assert_eq!(
        queue.get(&id("eager")).await?.failed_message(),
        Some("processor panicked")
    );
    assert_eq!(
        queue.get(&id("unbuildable")).await?.failed_message(),
        Some("processor factory panicked")
    );

    assert!(queue.is_running());
    let state = queue.state().await?;
    assert!(state.is_active);
    assert_eq!(state.active_processors, 0);

    queue.register_fn("eager", 1, quick)?;
    queue.store(job(&queue, "eager", "after")).await?;
    wait_for(&mut events, |e| is_finished(e) && about(e, "after")).await;

    queue.shutdown().await?;
    Ok(())
}

struct Greet;

impl Job for Greet {
    const NAME: &'static str = "greet";
    type Payload = String;
}

#[derive(Default)]
struct GreetProcessor;

impl Processor for GreetProcessor {
    type Job = Greet;

    fn process(&self, _job: JobRecord, payload: String, ctx: ProcessContext) -> ProcessFuture {
        async move {
            if payload.is_empty() {
                return Err(ProcessError::failed("nobody to greet"));
            }
            ctx.report_progress(1.0).await?;
            Ok(())
        }
        .boxed()
    }
}

#[tokio::test]
async fn typed_processor_receives_decoded_payload() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.register_processor::<GreetProcessor>(1)?;

    let record = JobRecord::typed::<Greet>(id("hello"), queue.name(), &"world".to_string())?;
    queue.store(record).await?;
    queue.resume().await?;

    let progress = wait_for(&mut events, |e| {
        matches!(e, QueueEvent::UpdatedProgress { .. })
    })
    .await;
    assert_eq!(progress.job().and_then(|job| job.progress), Some(1.0));

    wait_for(&mut events, |e| is_finished(e) && about(e, "hello")).await;
    let stored = queue.get(&id("hello")).await?;
    assert!(stored.is_complete());
    assert_eq!(stored.payload_as::<Greet>()?, "world");

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn set_status_ignores_no_ops_and_refuses_active() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue
        .store(job(&queue, "unclaimed", "held").with_status(JobStatus::Paused))
        .await?;
    wait_for(&mut events, |e| matches!(e, QueueEvent::Added { .. })).await;

    queue.set_status(&id("held"), JobStatus::Paused).await?;
    let err = queue
        .set_status(&id("held"), JobStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidStatusTransition { .. }));

    queue.set_status(&id("held"), JobStatus::Waiting).await?;
    let next = wait_for(&mut events, |_| true).await;
    assert!(matches!(next, QueueEvent::UpdatedStatus { .. }));
    assert!(next.job().is_some_and(|job| job.status.is_waiting()));

    let missing = queue
        .set_status(&id("ghost"), JobStatus::Paused)
        .await
        .unwrap_err();
    assert!(missing.is_not_found());

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn remove_all_reports_each_job() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    queue.store(job(&queue, "work", "one")).await?;
    queue.store(job(&queue, "work", "two")).await?;

    let removed = queue.remove_all().await?;
    assert_eq!(removed.len(), 2);
    for _ in 0..2 {
        wait_for(&mut events, |e| matches!(e, QueueEvent::Removed { .. })).await;
    }
    assert!(queue.get_all().await.is_err() || queue.get_all().await?.is_empty());

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn registry_tracks_running_queues() -> Result<(), Box<dyn Error>> {
    let (queue, _events) = start_queue().await;
    let name = queue.name().to_string();

    assert_eq!(global_registry().lookup(&name)?.name(), name);
    assert!(global_registry().names().contains(&name));

    let storage = Arc::new(queue_core::InMemoryStorage::new());
    let duplicate = JobQueue::start(name.clone(), storage).await;
    assert!(matches!(duplicate, Err(QueueError::InvalidConfiguration(_))));

    queue.shutdown().await?;
    assert!(matches!(
        global_registry().lookup(&name),
        Err(QueueError::QueueNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn state_reflects_lifecycle() -> Result<(), Box<dyn Error>> {
    let (queue, mut events) = start_queue().await;
    assert!(!queue.is_active().await?);

    queue.store(job(&queue, "work", "queued")).await?;
    let state = queue.state().await?;
    assert!(state.is_synchronize_pending);
    assert!(!state.is_synchronizing);

    queue.resume().await?;
    wait_for(&mut events, |e| matches!(e, QueueEvent::Resumed { .. })).await;
    assert!(queue.is_active().await?);

    queue.shutdown().await?;
    tokio::time::timeout(Duration::from_secs(2), async {
        while queue.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert!(queue.state().await.is_err());
    Ok(())
}

/// Counts synchronization passes; every pass reports its delayed jobs once.
#[derive(Default)]
struct PassCounter {
    passes: AtomicUsize,
}

impl PassCounter {
    fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

impl DelayStrategy for PassCounter {
    fn update(&self, _queue: &JobQueue, _delayed: &[JobRecord]) {
        self.passes.fetch_add(1, Ordering::SeqCst);
    }
}

async fn start_counted(debounce: Duration) -> Result<(JobQueue, Arc<PassCounter>), QueueError> {
    let counter = Arc::new(PassCounter::default());
    let queue = JobQueue::builder(
        format!("counted-{}", JobId::generate()),
        Arc::new(InMemoryStorage::new()),
    )
    .with_config(test_config().with_debounce(debounce))
    .with_delay_strategy(counter.clone())
    .start()
    .await?;
    Ok((queue, counter))
}

async fn settle(counter: &PassCounter, passes: usize) {
    tokio::time::timeout(common::EVENT_TIMEOUT, async {
        while counter.passes() < passes {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for a synchronization pass");
}

#[tokio::test]
async fn burst_of_mutations_runs_one_pass() -> Result<(), Box<dyn Error>> {
    let (queue, counter) = start_counted(Duration::from_millis(200)).await?;

    for n in 0..10 {
        queue.store(job(&queue, "unregistered", &format!("job-{n}"))).await?;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(counter.passes(), 0, "suspended queues never synchronize");
    assert!(queue.state().await?.is_synchronize_pending);

    queue.resume().await?;
    settle(&counter, 1).await;
    for n in 10..20 {
        queue.store(job(&queue, "unregistered", &format!("job-{n}"))).await?;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(counter.passes(), 2);

    let state = queue.state().await?;
    assert!(!state.is_synchronize_pending);
    assert!(!state.is_synchronizing);

    queue.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn change_made_during_a_pass_gets_another_pass() -> Result<(), Box<dyn Error>> {
    let (queue, counter) = start_counted(Duration::from_millis(20)).await?;
    let mut events = queue.subscribe();
    queue.register_fn("work", 1, until_cancelled)?;
    queue.store(job(&queue, "work", "a")).await?;
    queue.resume().await?;

    // Activating the job inside the first pass requests the second.
    wait_for(&mut events, |e| is_began(e) && about(e, "a")).await;
    settle(&counter, 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.passes(), 2);

    let state = queue.state().await?;
    assert!(!state.is_synchronize_pending);
    assert_eq!(state.active_processors, 1);

    queue.shutdown().await?;
    Ok(())
}
