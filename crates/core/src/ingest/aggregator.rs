use crate::config::env_parse;
use crate::domain::market::{Category, PriceData, StockSnapshot};
use crate::ingest::indicators::compute_indicators;
use crate::ingest::limiter::RateLimiters;
use crate::ingest::provider::{FundamentalsProvider, PriceProvider, SentimentProvider};
use crate::ingest::types::DailyBar;
use anyhow::Context;
use chrono::NaiveDate;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub sub_request_timeout: Duration,
    pub symbol_deadline: Duration,
    /// Calendar days of daily bars per symbol. The last bar is the price block and
    /// the full series feeds indicators (SMA-200 needs ~290).
    pub lookback_days: u32,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            sub_request_timeout: Duration::from_secs(10),
            symbol_deadline: Duration::from_secs(60),
            lookback_days: 400,
        }
    }
}

impl AggregatorOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(v) = env_parse::<u64>("AGGREGATOR_SUB_REQUEST_TIMEOUT_SECS") {
            out.sub_request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("AGGREGATOR_SYMBOL_DEADLINE_SECS") {
            out.symbol_deadline = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("AGGREGATOR_LOOKBACK_DAYS") {
            out.lookback_days = v.max(2);
        }
        out
    }
}

/// The one symbol-level failure: no usable price bar.
#[derive(Debug)]
pub struct MissingPriceError {
    pub symbol: String,
    pub detail: String,
}

impl fmt::Display for MissingPriceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no usable price data for {}: {}", self.symbol, self.detail)
    }
}

impl std::error::Error for MissingPriceError {}

pub struct MarketDataAggregator {
    price: Arc<dyn PriceProvider>,
    fundamentals: Option<Arc<dyn FundamentalsProvider>>,
    sentiment: Option<Arc<dyn SentimentProvider>>,
    limiters: RateLimiters,
    opts: AggregatorOptions,
}

impl MarketDataAggregator {
    pub fn new(
        price: Arc<dyn PriceProvider>,
        fundamentals: Option<Arc<dyn FundamentalsProvider>>,
        sentiment: Option<Arc<dyn SentimentProvider>>,
        limiters: RateLimiters,
        opts: AggregatorOptions,
    ) -> Self {
        Self {
            price,
            fundamentals,
            sentiment,
            limiters,
            opts,
        }
    }

    /// Builds a (possibly partial) snapshot. Only missing price data is an error;
    /// every other block degrades to `None`.
    pub async fn fetch(
        &self,
        symbol: &str,
        category: Category,
        as_of_date: NaiveDate,
    ) -> Result<StockSnapshot, MissingPriceError> {
        let deadline = Instant::now() + self.opts.symbol_deadline;
        let price_name = self.price.provider_name();

        let bars_fut = self.gated(
            price_name,
            "price",
            symbol,
            deadline,
            self.price.daily_bars(symbol, as_of_date, self.opts.lookback_days),
        );
        let fundamentals_fut = async {
            match &self.fundamentals {
                Some(p) => {
                    self.gated(p.provider_name(), "fundamentals", symbol, deadline, p.fundamentals(symbol))
                        .await
                }
                None => None,
            }
        };
        let sentiment_fut = async {
            match &self.sentiment {
                Some(p) => {
                    self.gated(
                        p.provider_name(),
                        "sentiment",
                        symbol,
                        deadline,
                        p.sentiment(symbol, as_of_date),
                    )
                    .await
                }
                None => None,
            }
        };

        let (bars, fundamentals, sentiment) = tokio::join!(bars_fut, fundamentals_fut, sentiment_fut);

        let bars = bars.unwrap_or_default();
        let price = price_from_bars(&bars).map_err(|err| MissingPriceError {
            symbol: symbol.to_string(),
            detail: format!("{err:#}"),
        })?;
        let technicals = Some(compute_indicators(&bars)).filter(|t| !t.is_empty());

        Ok(StockSnapshot {
            symbol: symbol.to_string(),
            date: as_of_date,
            category,
            price,
            technicals,
            fundamentals: fundamentals.filter(|f| !f.is_empty()),
            sentiment: sentiment.map(|s| s.normalized()),
        })
    }

    /// Waits on the provider's bucket (bounded by the symbol deadline), then runs
    /// the call under the sub-request timeout. Any failure yields `None`.
    async fn gated<T, F>(
        &self,
        provider: &str,
        block: &'static str,
        symbol: &str,
        deadline: Instant,
        fut: F,
    ) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let limiter = self.limiters.get(provider);
        let sub_timeout = self.opts.sub_request_timeout;
        let call = async move {
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }
            tokio::time::timeout(sub_timeout, fut).await
        };

        match tokio::time::timeout_at(deadline, call).await {
            Ok(Ok(Ok(v))) => Some(v),
            Ok(Ok(Err(err))) => {
                tracing::warn!(symbol, provider, block, error = %format!("{err:#}"), "sub-request failed");
                None
            }
            Ok(Err(_)) => {
                tracing::warn!(symbol, provider, block, timeout = ?sub_timeout, "sub-request timed out");
                None
            }
            Err(_) => {
                tracing::warn!(symbol, provider, block, "symbol deadline reached before sub-request finished");
                None
            }
        }
    }
}

/// Latest bar plus day-over-day change against the bar before it.
fn price_from_bars(bars: &[DailyBar]) -> anyhow::Result<PriceData> {
    let last = bars.last().context("price request returned no bars")?;
    let previous_close = bars
        .len()
        .checked_sub(2)
        .and_then(|i| bars.get(i))
        .map(|b| b.close);
    let change_percent = previous_close
        .filter(|p| *p > 0.0)
        .map(|p| (last.close - p) / p * 100.0);

    let price = PriceData {
        open: last.open,
        high: last.high,
        low: last.low,
        close: last.close,
        volume: last.volume,
        previous_close,
        change_percent,
    };
    price
        .validate()
        .with_context(|| format!("invalid bar on {}", last.date))?;
    Ok(price)
}
