//! Cron scheduling for the merge export job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use crate::runtime::config_loader::ScheduleSettings;
use crate::runtime::job::MergeExportJob;

/// Build a scheduler with the export job registered on its cron expression.
///
/// The scheduler is returned unstarted, together with the id of the cron job.
pub async fn build_scheduler(
    job: Arc<MergeExportJob>,
    schedule: &ScheduleSettings,
) -> Result<(JobScheduler, Uuid), JobSchedulerError> {
    let sched = JobScheduler::new().await?;

    let cron_job = Job::new_async(&schedule.cron, move |uuid, mut l| {
        let job = job.clone();
        Box::pin(async move {
            job.run_logged().await;
            log_next_run(&mut l, uuid).await;
        })
    })?;
    let job_id = sched.add(cron_job).await?;

    Ok((sched, job_id))
}

/// Log when the cron job fires next
pub async fn log_next_run(sched: &mut JobScheduler, job_id: Uuid) -> Option<DateTime<Utc>> {
    match sched.next_tick_for_job(job_id).await {
        Ok(Some(next)) => {
            tracing::info!("Next run scheduled at {}", next);
            Some(next)
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Could not read next run time: {}", e);
            None
        }
    }
}

/// Run the job on its schedule until Ctrl-C.
///
/// With `run_on_startup` set, one run happens immediately after the scheduler
/// starts. The run lock inside the job keeps it from overlapping a tick.
pub async fn serve(job: Arc<MergeExportJob>, schedule: &ScheduleSettings) -> anyhow::Result<()> {
    let (mut sched, job_id) = build_scheduler(job.clone(), schedule).await?;
    sched.start().await?;
    tracing::info!("Scheduler started with cron '{}'", schedule.cron);

    if schedule.run_on_startup {
        let startup = job.clone();
        let mut handle = sched.clone();
        tokio::spawn(async move {
            startup.run_logged().await;
            log_next_run(&mut handle, job_id).await;
        });
    } else {
        log_next_run(&mut sched, job_id).await;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    sched.shutdown().await?;

    Ok(())
}
