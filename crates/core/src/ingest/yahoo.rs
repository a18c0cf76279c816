use crate::config::{env_parse, Settings};
use crate::ingest::limiter::YAHOO;
use crate::ingest::provider::{JsonHttp, PriceProvider};
use crate::ingest::types::DailyBar;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct YahooFinanceClient {
    http: JsonHttp,
    base_url: String,
}

impl YahooFinanceClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .yahoo_base_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = env_parse::<u64>("YAHOO_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_attempts = env_parse::<u32>("YAHOO_MAX_ATTEMPTS").unwrap_or(DEFAULT_MAX_ATTEMPTS);

        Ok(Self {
            http: JsonHttp::new(Duration::from_secs(timeout_secs), max_attempts)?,
            base_url,
        })
    }

    pub fn http(&self) -> &JsonHttp {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[async_trait::async_trait]
impl PriceProvider for YahooFinanceClient {
    fn provider_name(&self) -> &'static str {
        YAHOO
    }

    async fn daily_bars(
        &self,
        symbol: &str,
        as_of_date: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<DailyBar>> {
        let url = format!("{}/v8/finance/chart/{symbol}", self.base_url());
        let start = as_of_date - ChronoDuration::days(i64::from(lookback_days));
        let end = as_of_date + ChronoDuration::days(1);
        let query = [
            ("period1", unix_midnight(start).to_string()),
            ("period2", unix_midnight(end).to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];

        let raw = self.http.get_json(&url, &query, HeaderMap::new()).await?;
        let resp: ChartResponse = serde_json::from_value(raw)
            .with_context(|| format!("failed to parse Yahoo chart response for {symbol}"))?;
        let bars = resp.into_bars()?;
        Ok(bars.into_iter().filter(|b| b.date <= as_of_date).collect())
    }
}

fn unix_midnight(d: NaiveDate) -> i64 {
    d.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl ChartResponse {
    fn into_bars(self) -> Result<Vec<DailyBar>> {
        if let Some(err) = self.chart.error.filter(|e| !e.is_null()) {
            anyhow::bail!("Yahoo chart error: {err}");
        }
        let result = self
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .context("Yahoo chart response has no result")?;
        let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

        let mut bars = Vec::with_capacity(result.timestamp.len());
        for (i, ts) in result.timestamp.iter().enumerate() {
            let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
            // Halted or partial sessions come back as nulls.
            let (Some(open), Some(high), Some(low), Some(close)) =
                (at(&quote.open), at(&quote.high), at(&quote.low), at(&quote.close))
            else {
                continue;
            };
            let Some(dt) = DateTime::from_timestamp(ts + result.meta.gmtoffset, 0) else {
                continue;
            };
            bars.push(DailyBar {
                date: dt.date_naive(),
                open,
                high,
                low,
                close,
                volume: at(&quote.volume).unwrap_or(0.0).max(0.0) as u64,
            });
        }
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_chart_and_skips_null_rows() {
        let v = json!({
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL", "gmtoffset": -14400},
                    "timestamp": [1753709400, 1753795800, 1753882200],
                    "indicators": {"quote": [{
                        "open": [214.0, null, 211.9],
                        "high": [214.8, 215.0, 212.4],
                        "low": [213.2, 210.0, 207.7],
                        "close": [214.05, 211.27, 209.05],
                        "volume": [37858000, 51411700, null]
                    }]}
                }],
                "error": null
            }
        });
        let resp: ChartResponse = serde_json::from_value(v).unwrap();
        let bars = resp.into_bars().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2025, 7, 28).unwrap());
        assert_eq!(bars[0].volume, 37_858_000);
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2025, 7, 30).unwrap());
        assert_eq!(bars[1].volume, 0);
    }

    #[test]
    fn surfaces_chart_errors() {
        let v = json!({"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}});
        let resp: ChartResponse = serde_json::from_value(v).unwrap();
        assert!(resp.into_bars().is_err());
    }
}
