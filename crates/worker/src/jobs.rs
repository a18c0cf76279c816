use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use stockpulse_core::config::Settings;
use stockpulse_core::domain::report::{DailyReport, SummaryReport};
use stockpulse_core::pipeline::PipelineError;
use stockpulse_core::time::us_market::{is_trading_day, resolve_as_of_date};

use crate::wiring;

/// `Ok(None)` for a dry run or when another run holds the date's lock.
pub async fn run_daily(
    settings: &Settings,
    as_of_date: Option<&str>,
    dry_run: bool,
    refresh_universe: bool,
) -> Result<Option<DailyReport>> {
    let as_of_date = resolve_as_of_date(as_of_date, Utc::now())?;
    if !is_trading_day(as_of_date) {
        tracing::warn!(%as_of_date, "as-of date is not a US trading day");
    }

    let pipeline = wiring::build_pipeline(settings, refresh_universe).await?;
    if dry_run {
        let universe = pipeline.dry_run(as_of_date).await?;
        tracing::info!(
            %as_of_date,
            dry_run = true,
            stable = universe.stable.len(),
            risky = universe.risky.len(),
            "universe collected; nothing written"
        );
        return Ok(None);
    }

    match pipeline.run(as_of_date).await {
        Ok(report) => Ok(Some(report)),
        Err(err) => match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::RunInProgress { .. }) => {
                tracing::warn!(%as_of_date, "as_of_date lock not acquired; another run in progress");
                Ok(None)
            }
            _ => Err(err),
        },
    }
}

/// Range ends at `end` (default: last completed session) and spans `days` days
/// unless `start` is given.
pub async fn run_summary(
    settings: &Settings,
    start: Option<&str>,
    end: Option<&str>,
    days: u32,
) -> Result<SummaryReport> {
    let end = resolve_as_of_date(end, Utc::now())?;
    let start = match start {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?,
        None => end - Duration::days(i64::from(days)),
    };
    let service = wiring::report_service(settings).await?;
    service.generate_summary_report(start, end).await
}
