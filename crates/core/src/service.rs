use crate::domain::analysis::StockRecord;
use crate::domain::market::Category;
use crate::domain::report::{CurrentRecommendations, DailyReport, SummaryReport};
use crate::domain::universe::{normalize_symbol, Universe};
use crate::report::summary::SubsequentReturns;
use crate::report::build_summary_report;
use crate::storage::{RecordKind, StorageStats, StoreKey, TimeSeriesStore};
use anyhow::{ensure, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use std::sync::Arc;

/// Read side over the store. Every method is a plain lookup except
/// `generate_summary_report`, which also persists its result.
#[derive(Debug, Clone)]
pub struct ReportService {
    store: Arc<TimeSeriesStore>,
}

impl ReportService {
    pub fn new(store: Arc<TimeSeriesStore>) -> Self {
        Self { store }
    }

    pub async fn get_latest_daily_report(&self) -> Result<Option<DailyReport>> {
        match self.store.latest(RecordKind::Reports).await? {
            Some(key) => self.store.get(RecordKind::Reports, &key).await,
            None => Ok(None),
        }
    }

    pub async fn get_daily_report(&self, date: NaiveDate) -> Result<Option<DailyReport>> {
        self.store.get(RecordKind::Reports, &StoreKey::date(date)).await
    }

    pub async fn get_current_recommendations(&self) -> Result<Option<CurrentRecommendations>> {
        let Some(report) = self.get_latest_daily_report().await? else {
            return Ok(None);
        };
        let overview = &report.market_overview;
        let mut market_context = format!("Market sentiment {}", overview.sentiment.as_str());
        if !overview.themes.is_empty() {
            market_context.push_str(&format!("; themes: {}", overview.themes.join(", ")));
        }
        Ok(Some(CurrentRecommendations {
            date: report.date,
            stable: report.stable_recommendation,
            risky: report.risky_recommendation,
            market_context,
        }))
    }

    /// Aggregates daily reports in `[start, end]` and stores the result under `end`.
    pub async fn generate_summary_report(&self, start: NaiveDate, end: NaiveDate) -> Result<SummaryReport> {
        ensure!(start <= end, "summary start {start} is after end {end}");
        let reports: Vec<DailyReport> = self.store.range(RecordKind::Reports, start, end).await?;
        let returns = self.subsequent_returns(&reports, end).await?;
        let summary = build_summary_report(start, end, &reports, &returns);
        self.store
            .put(RecordKind::Summaries, &StoreKey::date(end), &summary)
            .await?;
        tracing::info!(
            %start,
            %end,
            days = summary.days_analyzed,
            insufficient_data = summary.insufficient_data,
            "summary report generated"
        );
        Ok(summary)
    }

    pub async fn get_latest_summary_report(&self) -> Result<Option<SummaryReport>> {
        match self.store.latest(RecordKind::Summaries).await? {
            Some(key) => self.store.get(RecordKind::Summaries, &key).await,
            None => Ok(None),
        }
    }

    /// Most recent stored record for the symbol that carries an analysis.
    /// Snapshot-only records left by an interrupted run are skipped.
    pub async fn get_stock_analysis(&self, symbol: &str) -> Result<Option<StockRecord>> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(None);
        };
        for key in self
            .store
            .keys(RecordKind::Stocks)
            .await?
            .into_iter()
            .rev()
            .filter(|k| k.symbol.as_deref() == Some(symbol.as_str()))
        {
            if let Some(record) = self.store.get::<StockRecord>(RecordKind::Stocks, &key).await? {
                if record.analysis.is_some() {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Records for the symbol dated within the last `days` days up to `today`, newest first.
    pub async fn get_stock_history(
        &self,
        symbol: &str,
        days: u32,
        today: NaiveDate,
    ) -> Result<Vec<StockRecord>> {
        let Some(symbol) = normalize_symbol(symbol) else {
            return Ok(Vec::new());
        };
        let start = today - ChronoDuration::days(i64::from(days));
        let mut out = Vec::new();
        for key in self
            .store
            .keys_in_range(RecordKind::Stocks, start, today)
            .await?
            .into_iter()
            .rev()
            .filter(|k| k.symbol.as_deref() == Some(symbol.as_str()))
        {
            if let Some(record) = self.store.get::<StockRecord>(RecordKind::Stocks, &key).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    pub async fn get_watchlist(&self) -> Result<Option<Universe>> {
        self.store.current_universe().await
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.store.stats().await
    }

    /// For each pick, the move from entry price to the latest stored close after
    /// the pick date and no later than `end`.
    async fn subsequent_returns(&self, reports: &[DailyReport], end: NaiveDate) -> Result<SubsequentReturns> {
        let mut out = SubsequentReturns::new();
        let Some(first) = reports.iter().map(|r| r.date).min() else {
            return Ok(out);
        };
        let keys = self
            .store
            .keys_in_range(RecordKind::Stocks, first, end)
            .await?;

        for report in reports {
            for category in Category::ALL {
                let Some(pick) = report.recommendation(category) else {
                    continue;
                };
                if pick.entry_price <= 0.0 {
                    continue;
                }
                let later = keys
                    .iter()
                    .filter(|k| k.date > report.date && k.symbol.as_deref() == Some(pick.symbol.as_str()))
                    .next_back();
                let Some(key) = later else {
                    continue;
                };
                if let Some(record) = self.store.get::<StockRecord>(RecordKind::Stocks, key).await? {
                    let close = record.snapshot.price.close;
                    out.insert(
                        (report.date, pick.symbol.clone()),
                        (close - pick.entry_price) / pick.entry_price * 100.0,
                    );
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Recommendation;
    use crate::fixtures::record;
    use crate::report::build_daily_report;
    use crate::selector::SelectorOptions;
    use std::time::Duration;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    fn dated_record(day: u32, symbol: &str, close: f64) -> StockRecord {
        let mut r = record(symbol, Category::Stable, Recommendation::Buy, 0.8, 0.2);
        r.snapshot.date = d(day);
        r.snapshot.price.close = close;
        r.snapshot.price.high = close * 1.01;
        r.snapshot.price.low = close * 0.98;
        if let Some(a) = r.analysis.as_mut() {
            a.date = d(day);
        }
        r
    }

    async fn seed_day(store: &TimeSeriesStore, day: u32, symbol: &str, close: f64) {
        let rec = dated_record(day, symbol, close);
        store
            .put(RecordKind::Stocks, &StoreKey::stock(d(day), symbol), &rec)
            .await
            .unwrap();
        let universe = Universe {
            date: d(day),
            stable: vec![symbol.to_string()],
            risky: vec![],
            sources: vec![],
        };
        let report = build_daily_report(
            d(day),
            &universe,
            &[rec],
            &[],
            Duration::ZERO,
            &SelectorOptions::default(),
        );
        store
            .put(RecordKind::Reports, &StoreKey::date(d(day)), &report)
            .await
            .unwrap();
    }

    async fn service() -> (tempfile::TempDir, ReportService) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimeSeriesStore::open(dir.path()).await.unwrap();
        (dir, ReportService::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn empty_store_reads_as_none() {
        let (_dir, svc) = service().await;
        assert!(svc.get_latest_daily_report().await.unwrap().is_none());
        assert!(svc.get_current_recommendations().await.unwrap().is_none());
        assert!(svc.get_stock_analysis("AAPL").await.unwrap().is_none());
        assert!(svc.get_watchlist().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn current_recommendations_follow_latest_report() {
        let (_dir, svc) = service().await;
        seed_day(&svc.store, 28, "MSFT", 500.0).await;
        seed_day(&svc.store, 29, "AAPL", 210.0).await;

        let current = svc.get_current_recommendations().await.unwrap().unwrap();
        assert_eq!(current.date, d(29));
        assert_eq!(current.stable.unwrap().symbol, "AAPL");
        assert!(current.risky.is_none());
        assert_eq!(
            current.market_context,
            "Market sentiment POSITIVE; themes: ai demand, earnings momentum"
        );
    }

    #[tokio::test]
    async fn stock_lookups_use_latest_and_newest_first() {
        let (_dir, svc) = service().await;
        seed_day(&svc.store, 25, "AAPL", 200.0).await;
        seed_day(&svc.store, 28, "AAPL", 205.0).await;
        seed_day(&svc.store, 29, "MSFT", 500.0).await;

        let latest = svc.get_stock_analysis(" aapl ").await.unwrap().unwrap();
        assert_eq!(latest.snapshot.date, d(28));

        let history = svc.get_stock_history("AAPL", 30, d(29)).await.unwrap();
        let dates: Vec<_> = history.iter().map(|r| r.snapshot.date).collect();
        assert_eq!(dates, vec![d(28), d(25)]);

        let short = svc.get_stock_history("AAPL", 2, d(29)).await.unwrap();
        assert_eq!(short.len(), 1);
        assert!(svc.get_stock_analysis("not a symbol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stock_analysis_skips_snapshot_only_records() {
        let (_dir, svc) = service().await;
        seed_day(&svc.store, 28, "AAPL", 205.0).await;
        let mut interrupted = dated_record(29, "AAPL", 207.0);
        interrupted.analysis = None;
        svc.store
            .put(RecordKind::Stocks, &StoreKey::stock(d(29), "AAPL"), &interrupted)
            .await
            .unwrap();

        let got = svc.get_stock_analysis("AAPL").await.unwrap().unwrap();
        assert_eq!(got.snapshot.date, d(28));
        assert_eq!(got.analysis.unwrap().recommendation, Recommendation::Buy);
    }

    #[tokio::test]
    async fn summary_uses_later_closes_and_is_persisted() {
        let (_dir, svc) = service().await;
        seed_day(&svc.store, 25, "AAPL", 200.0).await;
        seed_day(&svc.store, 28, "AAPL", 210.0).await;
        seed_day(&svc.store, 29, "AAPL", 220.0).await;

        let summary = svc.generate_summary_report(d(1), d(29)).await.unwrap();
        assert_eq!(summary.days_analyzed, 3);
        let aapl = &summary.top_stable_performers[0];
        assert_eq!(aapl.symbol, "AAPL");
        assert_eq!(aapl.frequency, 3);
        // 25th -> 29th: +10%; 28th -> 29th: +4.76%; 29th has no later close.
        assert_eq!(aapl.avg_return, Some(7.38));

        let stored = svc.get_latest_summary_report().await.unwrap().unwrap();
        assert_eq!(stored.report_id, "SR_2025-07-29");
        assert_eq!(stored.top_stable_performers, summary.top_stable_performers);
    }

    #[tokio::test]
    async fn summary_rejects_inverted_range() {
        let (_dir, svc) = service().await;
        assert!(svc.generate_summary_report(d(29), d(1)).await.is_err());
    }
}
