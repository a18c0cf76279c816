use crate::domain::market::{FundamentalData, SentimentData};
use crate::ingest::types::DailyBar;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; stockpulse/0.1)";

#[async_trait::async_trait]
pub trait PriceProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Daily bars ending on or before `as_of_date`, oldest first.
    async fn daily_bars(
        &self,
        symbol: &str,
        as_of_date: NaiveDate,
        lookback_days: u32,
    ) -> Result<Vec<DailyBar>>;
}

#[async_trait::async_trait]
pub trait FundamentalsProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fundamentals(&self, symbol: &str) -> Result<FundamentalData>;
}

#[async_trait::async_trait]
pub trait SentimentProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn sentiment(&self, symbol: &str, as_of_date: NaiveDate) -> Result<SentimentData>;
}

/// Shared GET client with the retry policy used by every market data provider:
/// network errors, 429 and 5xx are retried with exponential backoff; other
/// statuses fail immediately.
#[derive(Debug, Clone)]
pub struct JsonHttp {
    http: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl JsonHttp {
    pub fn new(timeout: Duration, max_attempts: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build market data http client")?;
        Ok(Self {
            http,
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs(1),
        })
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<Value> {
        let text = self.get_text(url, query, headers).await?;
        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("response from {url} is not valid JSON"))
    }

    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: HeaderMap,
    ) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let res = self
                .http
                .get(url)
                .headers(headers.clone())
                .query(query)
                .send()
                .await;

            let res = match res {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= self.max_attempts {
                        return Err(err).with_context(|| format!("request to {url} failed"));
                    }
                    let backoff = self.backoff(attempt);
                    tracing::warn!(attempt, ?backoff, url, error = %err, "request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = res
                .text()
                .await
                .with_context(|| format!("failed to read response from {url}"))?;

            if !status.is_success() {
                if is_retryable(status) && attempt < self.max_attempts {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(attempt, ?backoff, url, http_status = %status, "HTTP error; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                anyhow::bail!("{url} HTTP {status}: {}", truncate(&text, 300));
            }

            return Ok(text);
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << (attempt - 1).min(16))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Numbers that providers send as strings ("28.5", "None", "-").
pub(crate) fn parse_num(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let t = s.trim().trim_end_matches('%');
            if t.is_empty() {
                return None;
            }
            t.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}
