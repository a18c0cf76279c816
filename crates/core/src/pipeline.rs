use crate::config::env_parse;
use crate::domain::analysis::StockRecord;
use crate::domain::market::Category;
use crate::domain::report::{DailyReport, SkippedSymbol};
use crate::domain::universe::Universe;
use crate::ingest::aggregator::MarketDataAggregator;
use crate::llm::engine::AnalysisEngine;
use crate::report::build_daily_report;
use crate::selector::SelectorOptions;
use crate::storage::lock::{release_as_of_date_lock, try_acquire_as_of_date_lock};
use crate::storage::{RecordKind, StoreKey, TimeSeriesStore};
use crate::universe::UniverseCollector;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

const DEADLINE_REASON: &str = "run deadline exceeded";

/// Failures that abort a run. The previous report stays the latest one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    EmptyUniverse { category: Category },
    RunInProgress { as_of_date: NaiveDate },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::EmptyUniverse { category } => {
                write!(f, "{category} universe is empty after seed fallback")
            }
            PipelineError::RunInProgress { as_of_date } => {
                write!(f, "a daily run for {as_of_date} is already in progress")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub run_deadline: Duration,
    pub max_concurrent_symbols: usize,
    /// Re-collect the universe even when one is stored for the date.
    pub refresh_universe: bool,
    pub lock_stale_after: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            run_deadline: Duration::from_secs(30 * 60),
            max_concurrent_symbols: 10,
            refresh_universe: false,
            lock_stale_after: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl PipelineOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(n) = env_parse::<u64>("RUN_DEADLINE_SECS").filter(|n| *n > 0) {
            out.run_deadline = Duration::from_secs(n);
        }
        if let Some(n) = env_parse::<usize>("MAX_CONCURRENT_SYMBOLS").filter(|n| *n > 0) {
            out.max_concurrent_symbols = n;
        }
        if let Some(n) = env_parse::<u64>("RUN_LOCK_STALE_SECS") {
            out.lock_stale_after = Duration::from_secs(n);
        }
        out
    }
}

enum SymbolOutcome {
    Analyzed(StockRecord),
    Skipped(String),
}

pub struct DailyPipeline {
    store: Arc<TimeSeriesStore>,
    collector: UniverseCollector,
    aggregator: Arc<MarketDataAggregator>,
    engine: Arc<AnalysisEngine>,
    selector: SelectorOptions,
    opts: PipelineOptions,
}

impl DailyPipeline {
    pub fn new(
        store: Arc<TimeSeriesStore>,
        collector: UniverseCollector,
        aggregator: Arc<MarketDataAggregator>,
        engine: Arc<AnalysisEngine>,
        selector: SelectorOptions,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            store,
            collector,
            aggregator,
            engine,
            selector,
            opts,
        }
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    /// Collects the universe without touching the store.
    pub async fn dry_run(&self, as_of_date: NaiveDate) -> Result<Universe> {
        let universe = self.collector.collect(as_of_date).await?;
        for (symbol, category) in universe.members() {
            tracing::info!(%as_of_date, symbol, %category, "dry run: would analyze");
        }
        Ok(universe)
    }

    /// One finite batch for `as_of_date`: universe, per-symbol snapshot and analysis,
    /// then the daily report. Re-running a date overwrites its records.
    pub async fn run(&self, as_of_date: NaiveDate) -> Result<DailyReport> {
        let started = Instant::now();
        let Some(lock) =
            try_acquire_as_of_date_lock(self.store.root(), as_of_date, self.opts.lock_stale_after)
                .await?
        else {
            return Err(PipelineError::RunInProgress { as_of_date }.into());
        };

        let res = self.run_locked(as_of_date, started).await;
        if let Err(err) = release_as_of_date_lock(lock).await {
            tracing::warn!(%as_of_date, error = %err, "failed to release run lock");
        }
        res
    }

    async fn run_locked(&self, as_of_date: NaiveDate, started: Instant) -> Result<DailyReport> {
        let universe = self.universe_for(as_of_date).await?;
        tracing::info!(
            %as_of_date,
            stable = universe.stable.len(),
            risky = universe.risky.len(),
            "daily run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.opts.max_concurrent_symbols.max(1)));
        let mut set = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();
        for (symbol, category) in universe.members() {
            let symbol = symbol.to_string();
            pending.insert(symbol.clone());
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let aggregator = Arc::clone(&self.aggregator);
            let engine = Arc::clone(&self.engine);
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        process_symbol(&store, &aggregator, &engine, &symbol, category, as_of_date).await
                    }
                    Err(err) => Err(err).context("symbol semaphore closed"),
                };
                (symbol, outcome)
            });
        }

        let deadline = started + self.opts.run_deadline;
        let mut records = Vec::new();
        let mut skipped = Vec::new();
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((symbol, outcome)))) => {
                    pending.remove(&symbol);
                    // Store failures abort the run; dropping the set aborts the rest.
                    match outcome? {
                        SymbolOutcome::Analyzed(record) => records.push(record),
                        SymbolOutcome::Skipped(reason) => skipped.push(SkippedSymbol { symbol, reason }),
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::error!(%as_of_date, error = %err, "symbol task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    tracing::warn!(
                        %as_of_date,
                        remaining = pending.len(),
                        deadline = ?self.opts.run_deadline,
                        "run deadline reached; aborting remaining symbols"
                    );
                    set.abort_all();
                    break;
                }
            }
        }
        let leftover_reason = if deadline_hit {
            DEADLINE_REASON
        } else {
            "symbol task failed"
        };
        skipped.extend(pending.into_iter().map(|symbol| SkippedSymbol {
            symbol,
            reason: leftover_reason.to_string(),
        }));

        let report = build_daily_report(
            as_of_date,
            &universe,
            &records,
            &skipped,
            started.elapsed(),
            &self.selector,
        );
        self.store
            .put(RecordKind::Reports, &StoreKey::date(as_of_date), &report)
            .await?;

        tracing::info!(
            %as_of_date,
            analyzed = report.stats.analyzed_count,
            skipped = report.stats.skipped.len(),
            fallbacks = report.stats.fallback_count,
            stable = report.stable_recommendation.as_ref().map(|r| r.symbol.as_str()),
            risky = report.risky_recommendation.as_ref().map(|r| r.symbol.as_str()),
            "daily run finished"
        );
        Ok(report)
    }

    async fn universe_for(&self, as_of_date: NaiveDate) -> Result<Universe> {
        let key = StoreKey::date(as_of_date);
        if !self.opts.refresh_universe {
            if let Some(universe) = self.store.get::<Universe>(RecordKind::Universe, &key).await? {
                tracing::info!(%as_of_date, "reusing stored universe");
                return Ok(universe);
            }
        }

        let universe = self.collector.collect(as_of_date).await?;
        self.store.put(RecordKind::Universe, &key, &universe).await?;

        // A backfill must not replace a newer current watchlist.
        let newer_exists = self
            .store
            .current_universe()
            .await?
            .is_some_and(|current| current.date > as_of_date);
        if !newer_exists {
            self.store.put_current_universe(&universe).await?;
        }
        Ok(universe)
    }
}

async fn process_symbol(
    store: &TimeSeriesStore,
    aggregator: &MarketDataAggregator,
    engine: &AnalysisEngine,
    symbol: &str,
    category: Category,
    as_of_date: NaiveDate,
) -> Result<SymbolOutcome> {
    let snapshot = match aggregator.fetch(symbol, category, as_of_date).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%as_of_date, symbol, error = %err, "skipping symbol");
            return Ok(SymbolOutcome::Skipped(err.to_string()));
        }
    };

    // The snapshot is stored before analysis so an aborted run still leaves data behind.
    let key = StoreKey::stock(as_of_date, symbol);
    let mut record = StockRecord {
        snapshot,
        analysis: None,
    };
    store.put(RecordKind::Stocks, &key, &record).await?;

    let analysis = engine.analyze(&record.snapshot).await;
    tracing::debug!(
        symbol,
        recommendation = ?analysis.recommendation,
        confidence = analysis.confidence,
        provider = %analysis.provider,
        "analysis stored"
    );
    record.analysis = Some(analysis);
    store.put(RecordKind::Stocks, &key, &record).await?;
    Ok(SymbolOutcome::Analyzed(record))
}
