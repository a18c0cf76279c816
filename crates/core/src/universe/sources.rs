use super::{Candidate, UniverseSource};
use crate::domain::market::Category;
use crate::ingest::provider::{parse_num, JsonHttp};
use crate::ingest::yahoo::YahooFinanceClient;
use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const BROWSER_UA: &str = "Mozilla/5.0 (compatible; stockpulse/0.1)";
const SCREENER_COUNT: usize = 50;
const LIST_MAX_SYMBOLS: usize = 50;

const SP500_URL: &str = "https://en.wikipedia.org/wiki/List_of_S%26P_500_companies";
const ARISTOCRATS_URL: &str = "https://en.wikipedia.org/wiki/S%26P_500_Dividend_Aristocrats";

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers
}

/// Yahoo predefined screener (`scrIds`), e.g. `day_gainers`.
pub struct ScreenerSource {
    name: String,
    category: Category,
    scr_id: String,
    count: usize,
    http: JsonHttp,
    base_url: String,
}

impl ScreenerSource {
    pub fn new(yahoo: &YahooFinanceClient, scr_id: &str, category: Category, count: usize) -> Self {
        Self {
            name: format!("yahoo_screener:{scr_id}"),
            category,
            scr_id: scr_id.to_string(),
            count,
            http: yahoo.http().clone(),
            base_url: yahoo.base_url().to_string(),
        }
    }
}

#[async_trait::async_trait]
impl UniverseSource for ScreenerSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    async fn fetch(&self) -> Result<Vec<Candidate>> {
        let url = format!("{}/v1/finance/screener/predefined/saved", self.base_url);
        let query = [
            ("scrIds", self.scr_id.clone()),
            ("count", self.count.to_string()),
        ];
        let raw = self.http.get_json(&url, &query, browser_headers()).await?;
        parse_screener(&raw).with_context(|| format!("unexpected screener payload for {}", self.scr_id))
    }
}

/// Yahoo sometimes wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`.
fn quote_num(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Object(map)) => parse_num(map.get("raw")),
        other => parse_num(other),
    }
}

pub(crate) fn parse_screener(raw: &Value) -> Result<Vec<Candidate>> {
    if let Some(err) = raw.pointer("/finance/error").filter(|e| !e.is_null()) {
        anyhow::bail!("screener error: {err}");
    }
    let quotes = raw
        .pointer("/finance/result/0/quotes")
        .and_then(Value::as_array)
        .context("missing finance.result[0].quotes")?;

    Ok(quotes
        .iter()
        .filter_map(|q| {
            let symbol = q.get("symbol")?.as_str()?.to_string();
            Some(Candidate {
                symbol,
                market_cap: quote_num(q.get("marketCap")),
                volume: quote_num(q.get("regularMarketVolume"))
                    .filter(|v| *v >= 0.0)
                    .map(|v| v as u64),
                change_percent: quote_num(q.get("regularMarketChangePercent")),
            })
        })
        .collect())
}

/// Ticker column of an HTML list page (index membership, dividend aristocrats).
pub struct HtmlListSource {
    name: String,
    category: Category,
    url: String,
    max_symbols: usize,
    http: JsonHttp,
    ticker_regex: Regex,
}

impl HtmlListSource {
    pub fn new(name: &str, url: &str, category: Category, http: JsonHttp) -> Result<Self> {
        let ticker_regex = Regex::new(r#"class="external text"[^>]*>([A-Z]{1,5}(?:[.\-][A-Z])?)</a>"#)
            .context("invalid ticker pattern")?;
        Ok(Self {
            name: name.to_string(),
            category,
            url: url.to_string(),
            max_symbols: LIST_MAX_SYMBOLS,
            http,
            ticker_regex,
        })
    }

    pub fn with_max_symbols(mut self, n: usize) -> Self {
        self.max_symbols = n;
        self
    }

    fn parse(&self, html: &str) -> Vec<Candidate> {
        let mut seen = BTreeSet::new();
        self.ticker_regex
            .captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .filter(|s| seen.insert(s.clone()))
            .take(self.max_symbols)
            .map(Candidate::symbol_only)
            .collect()
    }
}

#[async_trait::async_trait]
impl UniverseSource for HtmlListSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    async fn fetch(&self) -> Result<Vec<Candidate>> {
        let html = self.http.get_text(&self.url, &[], browser_headers()).await?;
        let out = self.parse(&html);
        anyhow::ensure!(!out.is_empty(), "no tickers found at {}", self.url);
        Ok(out)
    }
}

pub fn default_sources(yahoo: &YahooFinanceClient) -> Result<Vec<Arc<dyn UniverseSource>>> {
    let html_http = JsonHttp::new(Duration::from_secs(15), 2)?;
    let mut out: Vec<Arc<dyn UniverseSource>> = Vec::new();
    for scr_id in ["undervalued_large_caps", "most_actives"] {
        out.push(Arc::new(ScreenerSource::new(yahoo, scr_id, Category::Stable, SCREENER_COUNT)));
    }
    out.push(Arc::new(HtmlListSource::new(
        "wikipedia:sp500",
        SP500_URL,
        Category::Stable,
        html_http.clone(),
    )?));
    out.push(Arc::new(HtmlListSource::new(
        "wikipedia:dividend_aristocrats",
        ARISTOCRATS_URL,
        Category::Stable,
        html_http,
    )?));
    for scr_id in ["day_gainers", "small_cap_gainers", "aggressive_small_caps"] {
        out.push(Arc::new(ScreenerSource::new(yahoo, scr_id, Category::Risky, SCREENER_COUNT)));
    }
    Ok(out)
}
