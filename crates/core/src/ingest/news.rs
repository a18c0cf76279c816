use crate::config::{env_parse, Settings};
use crate::domain::market::SentimentData;
use crate::ingest::limiter::NEWSAPI;
use crate::ingest::provider::{JsonHttp, SentimentProvider};
use crate::ingest::types::NewsArticle;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://newsapi.org";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ARTICLES: u32 = 10;
const LOOKBACK_DAYS: i64 = 3;

const POSITIVE_WORDS: &[&str] = &[
    "up", "rise", "rises", "gain", "gains", "bull", "bullish", "surge", "surges", "jump", "jumps",
    "climb", "climbs", "rally", "rallies", "strong", "beat", "beats", "record", "upgrade",
];
const NEGATIVE_WORDS: &[&str] = &[
    "down", "fall", "falls", "drop", "drops", "bear", "bearish", "crash", "plunge", "plunges",
    "decline", "declines", "weak", "miss", "misses", "loss", "losses", "downgrade", "lawsuit",
];

#[derive(Debug, Clone)]
pub struct NewsApiClient {
    http: JsonHttp,
    base_url: String,
    api_key: String,
    max_articles: u32,
}

impl NewsApiClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.require_news_api_key()?.to_string();
        let base_url = std::env::var("NEWS_API_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = env_parse::<u64>("NEWS_API_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_articles = env_parse::<u32>("NEWS_MAX_ARTICLES")
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ARTICLES);

        Ok(Self {
            http: JsonHttp::new(Duration::from_secs(timeout_secs), 2)?,
            base_url,
            api_key,
            max_articles,
        })
    }
}

#[async_trait::async_trait]
impl SentimentProvider for NewsApiClient {
    fn provider_name(&self) -> &'static str {
        NEWSAPI
    }

    async fn sentiment(&self, symbol: &str, as_of_date: NaiveDate) -> Result<SentimentData> {
        let url = format!("{}/v2/everything", self.base_url.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        headers.insert("X-Api-Key", HeaderValue::from_str(&self.api_key)?);
        let query = [
            ("q", format!("\"{symbol}\" stock")),
            ("language", "en".to_string()),
            ("sortBy", "publishedAt".to_string()),
            ("pageSize", self.max_articles.to_string()),
            ("from", (as_of_date - ChronoDuration::days(LOOKBACK_DAYS)).to_string()),
            ("to", as_of_date.to_string()),
        ];

        let raw = self.http.get_json(&url, &query, headers).await?;
        let resp: EverythingResponse =
            serde_json::from_value(raw).context("failed to parse NewsAPI response")?;
        if resp.status != "ok" {
            anyhow::bail!(
                "NewsAPI error for {symbol}: {}",
                resp.message.unwrap_or_else(|| resp.status.clone())
            );
        }

        let articles: Vec<NewsArticle> = resp
            .articles
            .into_iter()
            .filter_map(|a| {
                Some(NewsArticle {
                    title: a.title?,
                    description: a.description,
                })
            })
            .collect();

        Ok(SentimentData {
            news_sentiment_score: score_articles(&articles),
            news_articles_count: Some(articles.len() as u32),
            social_sentiment: None,
            analyst_rating: None,
        }
        .normalized())
    }
}

/// Mean of per-article `pos / (pos + neg)` keyword ratios; neutral articles score 0.5.
pub fn score_articles(articles: &[NewsArticle]) -> Option<f64> {
    if articles.is_empty() {
        return None;
    }
    let total: f64 = articles
        .iter()
        .map(|a| {
            let text = match &a.description {
                Some(d) => format!("{} {d}", a.title),
                None => a.title.clone(),
            };
            score_text(&text)
        })
        .sum();
    Some(total / articles.len() as f64)
}

fn score_text(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let (mut pos, mut neg) = (0u32, 0u32);
    for word in lower.split(|c: char| !c.is_ascii_alphanumeric()) {
        if POSITIVE_WORDS.contains(&word) {
            pos += 1;
        } else if NEGATIVE_WORDS.contains(&word) {
            neg += 1;
        }
    }
    if pos + neg == 0 {
        0.5
    } else {
        f64::from(pos) / f64::from(pos + neg)
    }
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    title: Option<String>,
    description: Option<String>,
}
