//! Demo processors.

use std::time::Duration;

use actors::{ProcessContext, ProcessError, ProcessFuture, Processor};
use futures_util::FutureExt;
use queue_core::{Job, JobRecord};

/// Logs its message.
pub struct Echo;

impl Job for Echo {
    const NAME: &'static str = "echo";
    type Payload = String;
}

#[derive(Default)]
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    type Job = Echo;

    fn process(&self, job: JobRecord, message: String, _ctx: ProcessContext) -> ProcessFuture {
        async move {
            tracing::info!(job_id = %job.id, "Echo: {message}");
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
        .boxed()
    }
}

/// Sleeps for the given number of seconds, reporting progress and stopping
/// early when cancelled.
pub struct Sleep;

impl Job for Sleep {
    const NAME: &'static str = "sleep";
    type Payload = u64;
}

#[derive(Default)]
pub struct SleepProcessor;

impl Processor for SleepProcessor {
    type Job = Sleep;

    fn process(&self, _job: JobRecord, seconds: u64, ctx: ProcessContext) -> ProcessFuture {
        async move {
            tracing::info!("Sleeping for {} seconds", seconds);
            for elapsed in 1..=seconds {
                tokio::select! {
                    _ = ctx.cancellation().cancelled() => return ctx.check_cancelled(),
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                ctx.report_progress(elapsed as f32 / seconds as f32).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// Always fails.
pub fn fail(job: JobRecord, _ctx: ProcessContext) -> ProcessFuture {
    async move { Err(ProcessError::failed(format!("{} failed on purpose", job.id))) }.boxed()
}
