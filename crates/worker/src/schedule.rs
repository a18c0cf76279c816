use anyhow::{Context, Result};
use std::sync::Arc;
use stockpulse_core::config::Settings;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::jobs;

const DEFAULT_DAILY_CRON: &str = "0 0 9 * * Mon-Fri";
const DEFAULT_WEEKLY_CRON: &str = "0 0 10 * * Mon";
const WEEKLY_SUMMARY_DAYS: u32 = 30;

/// Registers the daily run and the weekly summary, then blocks until Ctrl-C.
/// Each trigger is one finite batch; a failed batch is reported and the
/// schedule keeps going.
pub async fn run(settings: Settings) -> Result<()> {
    let daily_cron = std::env::var("SCHEDULE_DAILY_CRON").unwrap_or_else(|_| DEFAULT_DAILY_CRON.to_string());
    let weekly_cron =
        std::env::var("SCHEDULE_WEEKLY_CRON").unwrap_or_else(|_| DEFAULT_WEEKLY_CRON.to_string());
    let settings = Arc::new(settings);

    let mut scheduler = JobScheduler::new()
        .await
        .context("failed to create job scheduler")?;

    let s = Arc::clone(&settings);
    let daily = Job::new_async(daily_cron.as_str(), move |_uuid, _l| {
        let settings = Arc::clone(&s);
        Box::pin(async move {
            tracing::info!("scheduled daily run triggered");
            match jobs::run_daily(&settings, None, false, false).await {
                Ok(Some(report)) => tracing::info!(report_id = %report.report_id, "scheduled daily run finished"),
                Ok(None) => {}
                Err(err) => {
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(error = %format!("{err:#}"), "scheduled daily run failed");
                }
            }
        })
    })
    .with_context(|| format!("invalid daily cron expression {daily_cron:?}"))?;

    let s = Arc::clone(&settings);
    let weekly = Job::new_async(weekly_cron.as_str(), move |_uuid, _l| {
        let settings = Arc::clone(&s);
        Box::pin(async move {
            tracing::info!("scheduled summary triggered");
            match jobs::run_summary(&settings, None, None, WEEKLY_SUMMARY_DAYS).await {
                Ok(summary) => tracing::info!(report_id = %summary.report_id, days = summary.days_analyzed, "scheduled summary finished"),
                Err(err) => {
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(error = %format!("{err:#}"), "scheduled summary failed");
                }
            }
        })
    })
    .with_context(|| format!("invalid weekly cron expression {weekly_cron:?}"))?;

    scheduler.add(daily).await.context("failed to add daily job")?;
    scheduler.add(weekly).await.context("failed to add weekly job")?;
    scheduler.start().await.context("failed to start job scheduler")?;
    tracing::info!(daily = %daily_cron, weekly = %weekly_cron, "scheduler started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down scheduler");
    scheduler.shutdown().await.context("failed to stop job scheduler")?;
    Ok(())
}
