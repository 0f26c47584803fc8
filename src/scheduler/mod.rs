//! Cron wiring for the tracker's four recurring jobs.
//!
//! ```text
//! 23:59  clear   → empty the queue (bounds retries to one day)
//! 00:00  assign  → queue every tracked product code
//! hh:30  drain   → scrape + reconcile, re-queue transient failures
//! 04:00  report  → digest of targets met / low stock
//! ```

use crate::config::ScheduleConfig;
use crate::pipeline::Tracker;
use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::error;

fn job<F, Fut>(cron: &str, tracker: &Arc<Tracker>, run: F) -> Result<Job>
where
    F: Fn(Arc<Tracker>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let tracker = Arc::clone(tracker);
    Job::new_async(cron, move |_uuid, _lock| {
        let fut: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(run(Arc::clone(&tracker)));
        fut
    })
    .with_context(|| format!("Invalid cron expression {cron:?}"))
}

/// Register all jobs and start the scheduler.
pub async fn start(tracker: Arc<Tracker>, schedule: &ScheduleConfig) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    scheduler
        .add(job(&schedule.clear, &tracker, |t| async move {
            t.clear_jobs().await;
        })?)
        .await?;

    scheduler
        .add(job(&schedule.assign, &tracker, |t| async move {
            if let Err(e) = t.assign_jobs().await {
                error!("assign task failed: {:#}", e);
            }
        })?)
        .await?;

    scheduler
        .add(job(&schedule.drain, &tracker, |t| async move {
            if let Err(e) = t.drain().await {
                error!("scrape task failed: {:#}", e);
            }
        })?)
        .await?;

    scheduler
        .add(job(&schedule.report, &tracker, |t| async move {
            if let Err(e) = t.send_daily_report().await {
                error!("daily report failed: {:#}", e);
            }
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!(
        "Scheduled tasks started (assign {:?}, drain {:?}, report {:?}, clear {:?})",
        schedule.assign,
        schedule.drain,
        schedule.report,
        schedule.clear
    );
    Ok(scheduler)
}
