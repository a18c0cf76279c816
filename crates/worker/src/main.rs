use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use stockpulse_core::config::Settings;
use stockpulse_core::storage::{RecordKind, StoreOptions};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod jobs;
mod schedule;
mod wiring;

#[derive(Debug, Parser)]
#[command(name = "stockpulse_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daily pipeline once.
    Daily {
        /// Market as-of date (YYYY-MM-DD). Defaults to the last completed US session.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Collect the universe and stop; nothing is written.
        #[arg(long)]
        dry_run: bool,

        /// Re-collect the universe even if one is stored for the date.
        #[arg(long)]
        refresh_universe: bool,
    },
    /// Aggregate stored daily reports into a summary.
    Summary {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Delete dated records older than the retention horizon.
    Cleanup {
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Print stored data as JSON.
    Show {
        #[command(subcommand)]
        what: Show,
    },
    /// Run the daily and weekly jobs on a cron schedule.
    Schedule,
}

#[derive(Debug, Subcommand)]
enum Show {
    Latest,
    Date { date: String },
    Current,
    Stock { symbol: String },
    History {
        symbol: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    Watchlist,
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let res = run(args.command, settings).await;
    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker command failed");
    }
    res
}

async fn run(command: Command, settings: Settings) -> anyhow::Result<()> {
    match command {
        Command::Daily {
            as_of_date,
            dry_run,
            refresh_universe,
        } => {
            if let Some(report) =
                jobs::run_daily(&settings, as_of_date.as_deref(), dry_run, refresh_universe).await?
            {
                print_json(&report)?;
            }
        }
        Command::Summary { start, end, days } => {
            let summary = jobs::run_summary(&settings, start.as_deref(), end.as_deref(), days).await?;
            print_json(&summary)?;
        }
        Command::Cleanup { retention_days } => {
            let retention_days = retention_days
                .map(i64::from)
                .unwrap_or(StoreOptions::from_env().retention_days);
            let cutoff = Utc::now().date_naive() - Duration::days(retention_days);
            let store = wiring::open_store(&settings).await?;
            let mut removed = 0;
            for kind in RecordKind::ALL {
                removed += store.prune_older_than(kind, cutoff).await?;
            }
            tracing::info!(%cutoff, removed, "cleanup finished");
        }
        Command::Show { what } => show(what, &settings).await?,
        Command::Schedule => schedule::run(settings).await?,
    }
    Ok(())
}

async fn show(what: Show, settings: &Settings) -> anyhow::Result<()> {
    let service = wiring::report_service(settings).await?;
    match what {
        Show::Latest => print_json(&service.get_latest_daily_report().await?),
        Show::Date { date } => {
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .with_context(|| format!("invalid date {date:?}; expected YYYY-MM-DD"))?;
            print_json(&service.get_daily_report(date).await?)
        }
        Show::Current => print_json(&service.get_current_recommendations().await?),
        Show::Stock { symbol } => print_json(&service.get_stock_analysis(&symbol).await?),
        Show::History { symbol, days } => {
            let today = Utc::now().date_naive();
            print_json(&service.get_stock_history(&symbol, days, today).await?)
        }
        Show::Watchlist => print_json(&service.get_watchlist().await?),
        Show::Stats => print_json(&service.storage_stats().await?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily_flags() {
        let args = Args::try_parse_from([
            "stockpulse_worker",
            "daily",
            "--as-of-date",
            "2025-07-29",
            "--refresh-universe",
        ])
        .unwrap();
        match args.command {
            Command::Daily {
                as_of_date,
                dry_run,
                refresh_universe,
            } => {
                assert_eq!(as_of_date.as_deref(), Some("2025-07-29"));
                assert!(!dry_run);
                assert!(refresh_universe);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_show_history_with_default_days() {
        let args = Args::try_parse_from(["stockpulse_worker", "show", "history", "AAPL"]).unwrap();
        match args.command {
            Command::Show {
                what: Show::History { symbol, days },
            } => {
                assert_eq!(symbol, "AAPL");
                assert_eq!(days, 30);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn summary_requires_no_arguments() {
        let args = Args::try_parse_from(["stockpulse_worker", "summary", "--days", "7"]).unwrap();
        assert!(matches!(args.command, Command::Summary { days: 7, .. }));
    }
}
