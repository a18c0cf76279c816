use crate::config::{env_parse, Settings};
use crate::domain::market::FundamentalData;
use crate::ingest::limiter::ALPHA_VANTAGE;
use crate::ingest::provider::{parse_num, FundamentalsProvider, JsonHttp};
use anyhow::Result;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 1;

#[derive(Debug, Clone)]
pub struct AlphaVantageClient {
    http: JsonHttp,
    base_url: String,
    api_key: String,
}

impl AlphaVantageClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_alpha_vantage_api_key()?.to_string();
        let base_url = std::env::var("ALPHA_VANTAGE_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs =
            env_parse::<u64>("ALPHA_VANTAGE_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);

        // Retries burn quota on a 5/minute plan; the aggregator's limiter paces calls instead.
        Ok(Self {
            http: JsonHttp::new(Duration::from_secs(timeout_secs), DEFAULT_MAX_ATTEMPTS)?,
            base_url,
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl FundamentalsProvider for AlphaVantageClient {
    fn provider_name(&self) -> &'static str {
        ALPHA_VANTAGE
    }

    async fn fundamentals(&self, symbol: &str) -> Result<FundamentalData> {
        let url = format!("{}/query", self.base_url.trim_end_matches('/'));
        let query = [
            ("function", "OVERVIEW".to_string()),
            ("symbol", symbol.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        let raw = self.http.get_json(&url, &query, HeaderMap::new()).await?;
        parse_overview(symbol, &raw)
    }
}

fn parse_overview(symbol: &str, v: &Value) -> Result<FundamentalData> {
    // Throttling and key problems come back as HTTP 200 with a message body.
    for key in ["Note", "Information", "Error Message"] {
        if let Some(msg) = v.get(key).and_then(Value::as_str) {
            anyhow::bail!("Alpha Vantage refused OVERVIEW for {symbol}: {msg}");
        }
    }
    anyhow::ensure!(
        v.get("Symbol").and_then(Value::as_str).is_some(),
        "Alpha Vantage has no overview for {symbol}"
    );

    let market_cap = parse_num(v.get("MarketCapitalization"))
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64);
    // OVERVIEW reports yield as a fraction; convert to percent.
    let dividend_yield = parse_num(v.get("DividendYield")).map(|y| y * 100.0);

    Ok(FundamentalData {
        pe_ratio: parse_num(v.get("PERatio")),
        market_cap,
        dividend_yield,
        eps_ttm: parse_num(v.get("EPS")),
        revenue_growth: parse_num(v.get("QuarterlyRevenueGrowthYOY")),
        debt_to_equity: parse_num(v.get("DebtToEquity")),
    })
}
