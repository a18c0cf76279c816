pub mod sources;

use crate::config::{env_list, env_parse};
use crate::domain::market::Category;
use crate::domain::universe::{normalize_symbol, SourceOutcome, SourceStatus, Universe};
use crate::pipeline::PipelineError;
use anyhow::Result;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub use sources::{default_sources, HtmlListSource, ScreenerSource};

const DEFAULT_STABLE_SEED: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "BRK-B", "UNH", "JNJ", "JPM", "PG", "HD",
    "V", "MA", "WMT", "DIS", "KO", "PEP", "MRK", "XOM",
];
const DEFAULT_RISKY_SEED: &[&str] = &[
    "TSLA", "PLTR", "COIN", "UPST", "ROKU", "DKNG", "CRWD", "SNOW", "RIVN", "HOOD", "SOFI",
    "AFRM", "MARA", "RBLX", "SHOP",
];

/// One screener or list row. Metrics are optional; list pages only carry the ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub market_cap: Option<f64>,
    pub volume: Option<u64>,
    pub change_percent: Option<f64>,
}

impl Candidate {
    pub fn symbol_only(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            market_cap: None,
            volume: None,
            change_percent: None,
        }
    }

    fn fill_from(&mut self, other: &Candidate) {
        self.market_cap = self.market_cap.or(other.market_cap);
        self.volume = self.volume.or(other.volume);
        self.change_percent = self.change_percent.or(other.change_percent);
    }
}

#[async_trait::async_trait]
pub trait UniverseSource: Send + Sync {
    fn name(&self) -> &str;
    fn category(&self) -> Category;
    async fn fetch(&self) -> Result<Vec<Candidate>>;
}

#[derive(Debug, Clone)]
pub struct UniverseOptions {
    pub max_stable: usize,
    pub max_risky: usize,
    /// Symbols with a known volume below this are dropped. Unknown volume passes.
    pub min_volume: u64,
    pub source_timeout: Duration,
    pub stable_seed: Vec<String>,
    pub risky_seed: Vec<String>,
}

impl Default for UniverseOptions {
    fn default() -> Self {
        Self {
            max_stable: 25,
            max_risky: 15,
            min_volume: 100_000,
            source_timeout: Duration::from_secs(30),
            stable_seed: DEFAULT_STABLE_SEED.iter().map(|s| s.to_string()).collect(),
            risky_seed: DEFAULT_RISKY_SEED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UniverseOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(n) = env_parse::<usize>("UNIVERSE_MAX_STABLE") {
            out.max_stable = n;
        }
        if let Some(n) = env_parse::<usize>("UNIVERSE_MAX_RISKY") {
            out.max_risky = n;
        }
        if let Some(n) = env_parse::<u64>("UNIVERSE_MIN_VOLUME") {
            out.min_volume = n;
        }
        if let Some(n) = env_parse::<u64>("UNIVERSE_SOURCE_TIMEOUT_SECS") {
            out.source_timeout = Duration::from_secs(n);
        }
        if let Some(v) = env_list("UNIVERSE_STABLE_SEED").filter(|v| !v.is_empty()) {
            out.stable_seed = v;
        }
        if let Some(v) = env_list("UNIVERSE_RISKY_SEED").filter(|v| !v.is_empty()) {
            out.risky_seed = v;
        }
        out
    }

    fn max(&self, category: Category) -> usize {
        match category {
            Category::Stable => self.max_stable,
            Category::Risky => self.max_risky,
        }
    }

    fn seed(&self, category: Category) -> &[String] {
        match category {
            Category::Stable => &self.stable_seed,
            Category::Risky => &self.risky_seed,
        }
    }
}

pub struct UniverseCollector {
    sources: Vec<Arc<dyn UniverseSource>>,
    opts: UniverseOptions,
}

impl UniverseCollector {
    pub fn new(sources: Vec<Arc<dyn UniverseSource>>, opts: UniverseOptions) -> Self {
        Self { sources, opts }
    }

    /// Queries every source concurrently and builds the day's watchlist.
    /// Source failures are recorded, not returned; only an empty category after
    /// the seed fallback is an error.
    pub async fn collect(&self, date: NaiveDate) -> Result<Universe> {
        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let timeout = self.opts.source_timeout;
            set.spawn(async move {
                let res = match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(res) => res,
                    Err(_) => Err(anyhow::anyhow!("timed out after {timeout:?}")),
                };
                (idx, res)
            });
        }

        let mut results: Vec<(usize, Result<Vec<Candidate>>)> = Vec::with_capacity(self.sources.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(err) => tracing::warn!(error = %err, "universe source task failed"),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);

        let mut outcomes = Vec::with_capacity(self.sources.len());
        let mut merged: BTreeMap<Category, Vec<Candidate>> = BTreeMap::new();
        let mut seen_idx = BTreeSet::new();
        for (idx, res) in results {
            seen_idx.insert(idx);
            let source = &self.sources[idx];
            let category = source.category();
            match res {
                Ok(candidates) => {
                    tracing::info!(source = source.name(), %category, count = candidates.len(), "universe source ok");
                    outcomes.push(SourceOutcome {
                        source: source.name().to_string(),
                        category,
                        status: SourceStatus::Ok,
                        candidates: candidates.len(),
                        error: None,
                    });
                    merge_into(merged.entry(category).or_default(), candidates);
                }
                Err(err) => {
                    tracing::warn!(source = source.name(), %category, error = %err, "universe source failed");
                    outcomes.push(SourceOutcome {
                        source: source.name().to_string(),
                        category,
                        status: SourceStatus::Failed,
                        candidates: 0,
                        error: Some(format!("{err:#}")),
                    });
                }
            }
        }
        for (idx, source) in self.sources.iter().enumerate() {
            if !seen_idx.contains(&idx) {
                outcomes.push(SourceOutcome {
                    source: source.name().to_string(),
                    category: source.category(),
                    status: SourceStatus::Failed,
                    candidates: 0,
                    error: Some("source task panicked".to_string()),
                });
            }
        }

        backfill_metrics(&mut merged);

        let stable = self.finalize(Category::Stable, merged.remove(&Category::Stable), &BTreeSet::new())?;
        let taken: BTreeSet<String> = stable.iter().cloned().collect();
        let risky = self.finalize(Category::Risky, merged.remove(&Category::Risky), &taken)?;

        tracing::info!(%date, stable = stable.len(), risky = risky.len(), "universe collected");
        Ok(Universe {
            date,
            stable,
            risky,
            sources: outcomes,
        })
    }

    fn finalize(
        &self,
        category: Category,
        candidates: Option<Vec<Candidate>>,
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let candidates: Vec<Candidate> = candidates
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !exclude.contains(&c.symbol))
            .filter(|c| c.volume.map_or(true, |v| v >= self.opts.min_volume))
            .collect();

        let mut symbols = rank(candidates, category, self.opts.max(category));
        if symbols.is_empty() {
            tracing::warn!(%category, "no candidates from sources; using seed list");
            let mut seen = BTreeSet::new();
            symbols = self
                .opts
                .seed(category)
                .iter()
                .filter_map(|s| normalize_symbol(s))
                .filter(|s| !exclude.contains(s) && seen.insert(s.clone()))
                .take(self.opts.max(category))
                .collect();
        }
        if symbols.is_empty() {
            return Err(PipelineError::EmptyUniverse { category }.into());
        }
        Ok(symbols)
    }
}

/// List pages carry only tickers. Fills their volume and other metrics from any
/// screener row for the same symbol, whatever its category, so the liquidity
/// filter sees them.
fn backfill_metrics(merged: &mut BTreeMap<Category, Vec<Candidate>>) {
    let mut known: BTreeMap<String, Candidate> = BTreeMap::new();
    for c in merged.values().flatten() {
        known
            .entry(c.symbol.clone())
            .and_modify(|k| k.fill_from(c))
            .or_insert_with(|| c.clone());
    }
    for c in merged.values_mut().flatten() {
        if let Some(k) = known.get(&c.symbol) {
            c.fill_from(k);
        }
    }
}

/// Dedupes by normalized symbol, keeping first-seen order and filling missing metrics
/// from later rows.
fn merge_into(acc: &mut Vec<Candidate>, incoming: Vec<Candidate>) {
    for mut c in incoming {
        let Some(symbol) = normalize_symbol(&c.symbol) else {
            tracing::debug!(raw = %c.symbol, "dropping malformed symbol");
            continue;
        };
        c.symbol = symbol;
        match acc.iter_mut().find(|existing| existing.symbol == c.symbol) {
            Some(existing) => existing.fill_from(&c),
            None => acc.push(c),
        }
    }
}

/// Stable by market cap, risky by day change; unknown metrics last, ties by symbol.
fn rank(mut candidates: Vec<Candidate>, category: Category, max: usize) -> Vec<String> {
    let metric = |c: &Candidate| match category {
        Category::Stable => c.market_cap,
        Category::Risky => c.change_percent,
    };
    candidates.sort_by(|a, b| {
        match (metric(a), metric(b)) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates.into_iter().take(max).map(|c| c.symbol).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::date;

    struct FakeSource {
        name: &'static str,
        category: Category,
        result: std::result::Result<Vec<Candidate>, &'static str>,
    }

    #[async_trait::async_trait]
    impl UniverseSource for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        fn category(&self) -> Category {
            self.category
        }

        async fn fetch(&self) -> Result<Vec<Candidate>> {
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn cand(symbol: &str, cap: Option<f64>, volume: Option<u64>, change: Option<f64>) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            market_cap: cap,
            volume,
            change_percent: change,
        }
    }

    fn source(
        name: &'static str,
        category: Category,
        result: std::result::Result<Vec<Candidate>, &'static str>,
    ) -> Arc<dyn UniverseSource> {
        Arc::new(FakeSource { name, category, result })
    }

    fn opts() -> UniverseOptions {
        UniverseOptions {
            max_stable: 3,
            max_risky: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merges_ranks_and_keeps_categories_disjoint() {
        let collector = UniverseCollector::new(
            vec![
                source(
                    "screener",
                    Category::Stable,
                    Ok(vec![
                        cand("msft", Some(3.1e12), Some(20_000_000), None),
                        cand("AAPL", Some(3.4e12), Some(50_000_000), None),
                        cand("KO", Some(2.6e11), Some(50_000), None),
                    ]),
                ),
                source(
                    "index",
                    Category::Stable,
                    Ok(vec![
                        Candidate::symbol_only("JNJ"),
                        Candidate::symbol_only("MSFT"),
                        Candidate::symbol_only("bad symbol"),
                    ]),
                ),
                source(
                    "gainers",
                    Category::Risky,
                    Ok(vec![
                        cand("AAPL", None, None, Some(9.0)),
                        cand("PLTR", None, Some(80_000_000), Some(7.5)),
                        cand("COIN", None, Some(9_000_000), Some(12.0)),
                        cand("HOOD", None, Some(9_000_000), None),
                    ]),
                ),
            ],
            opts(),
        );

        let u = collector.collect(date()).await.unwrap();
        // KO dropped for volume; JNJ has no market cap so ranks last.
        assert_eq!(u.stable, vec!["AAPL", "MSFT", "JNJ"]);
        // AAPL is already stable.
        assert_eq!(u.risky, vec!["COIN", "PLTR"]);
        assert_eq!(u.sources.len(), 3);
        assert!(u.sources.iter().all(|s| s.status == SourceStatus::Ok));
    }

    #[tokio::test]
    async fn list_entries_take_volume_from_other_screeners() {
        let collector = UniverseCollector::new(
            vec![
                source(
                    "index",
                    Category::Stable,
                    Ok(vec![Candidate::symbol_only("AAPL"), Candidate::symbol_only("TINY")]),
                ),
                source(
                    "gainers",
                    Category::Risky,
                    Ok(vec![
                        cand("TINY", None, Some(500), Some(40.0)),
                        cand("GME", None, Some(2_000_000), Some(15.0)),
                    ]),
                ),
            ],
            opts(),
        );

        let u = collector.collect(date()).await.unwrap();
        // TINY's screener volume is below the floor in both categories.
        assert_eq!(u.stable, vec!["AAPL"]);
        assert_eq!(u.risky, vec!["GME"]);
    }

    #[tokio::test]
    async fn failed_sources_fall_back_to_seed() {
        let collector = UniverseCollector::new(
            vec![
                source("screener", Category::Stable, Err("HTTP 503")),
                source("gainers", Category::Risky, Ok(vec![cand("PLTR", None, None, Some(3.0))])),
            ],
            UniverseOptions {
                stable_seed: vec!["aapl".into(), "MSFT".into(), "AAPL".into()],
                ..opts()
            },
        );

        let u = collector.collect(date()).await.unwrap();
        assert_eq!(u.stable, vec!["AAPL", "MSFT"]);
        assert_eq!(u.risky, vec!["PLTR"]);
        let failed = &u.sources[0];
        assert_eq!(failed.status, SourceStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn empty_after_fallback_is_fatal() {
        let collector = UniverseCollector::new(
            vec![source("gainers", Category::Risky, Err("down"))],
            UniverseOptions {
                risky_seed: vec![],
                ..opts()
            },
        );

        let err = collector.collect(date()).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::EmptyUniverse { category }) => assert_eq!(*category, Category::Risky),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
