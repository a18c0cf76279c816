pub mod domain;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod selector;
pub mod service;
pub mod storage;
pub mod time;
pub mod universe;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::str::FromStr;

    const DEFAULT_DATA_DIR: &str = "data";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub data_dir: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub openai_api_key: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub news_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub analysis_providers: Option<String>,
        pub yahoo_base_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                data_dir: std::env::var("DATA_DIR").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
                alpha_vantage_api_key: std::env::var("ALPHA_VANTAGE_API_KEY").ok(),
                news_api_key: std::env::var("NEWS_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                analysis_providers: std::env::var("ANALYSIS_PROVIDERS").ok(),
                yahoo_base_url: std::env::var("YAHOO_BASE_URL").ok(),
            })
        }

        pub fn data_dir(&self) -> PathBuf {
            self.data_dir
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }

        pub fn require_openai_api_key(&self) -> anyhow::Result<&str> {
            self.openai_api_key
                .as_deref()
                .context("OPENAI_API_KEY is required")
        }

        pub fn require_alpha_vantage_api_key(&self) -> anyhow::Result<&str> {
            self.alpha_vantage_api_key
                .as_deref()
                .context("ALPHA_VANTAGE_API_KEY is required")
        }

        pub fn require_news_api_key(&self) -> anyhow::Result<&str> {
            self.news_api_key
                .as_deref()
                .context("NEWS_API_KEY is required")
        }
    }

    /// Reads and parses an env var, treating missing or unparsable values as unset.
    pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
        std::env::var(key)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
    }

    /// Comma-separated env list, trimmed, empty entries dropped.
    pub fn env_list(key: &str) -> Option<Vec<String>> {
        let raw = std::env::var(key).ok()?;
        let out: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Some(out)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::analysis::{AnalysisResult, Recommendation, StockRecord, TrendDirection};
    use crate::domain::market::{
        Category, FundamentalData, PriceData, SentimentData, StockSnapshot, TechnicalIndicators,
    };
    use chrono::NaiveDate;

    pub fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 29).unwrap()
    }

    pub fn snapshot(symbol: &str, category: Category, close: f64) -> StockSnapshot {
        StockSnapshot {
            symbol: symbol.to_string(),
            date: date(),
            category,
            price: PriceData {
                open: close * 0.99,
                high: close * 1.01,
                low: close * 0.98,
                close,
                volume: 25_000_000,
                previous_close: Some(close / 1.01),
                change_percent: Some(1.0),
            },
            technicals: Some(TechnicalIndicators {
                rsi_14: Some(55.0),
                sma_20: Some(close * 0.98),
                sma_50: Some(close * 0.95),
                bollinger_upper: Some(close * 1.05),
                bollinger_lower: Some(close * 0.95),
                ..Default::default()
            }),
            fundamentals: Some(FundamentalData {
                pe_ratio: Some(28.0),
                market_cap: Some(3_000_000_000_000),
                ..Default::default()
            }),
            sentiment: Some(SentimentData {
                news_sentiment_score: Some(0.7),
                news_articles_count: Some(8),
                ..Default::default()
            }),
        }
    }

    pub fn analysis(
        symbol: &str,
        category: Category,
        recommendation: Recommendation,
        confidence: f64,
        risk_score: f64,
    ) -> AnalysisResult {
        AnalysisResult {
            symbol: symbol.to_string(),
            date: date(),
            category,
            trend_direction: TrendDirection::Bullish,
            trend_strength: 0.6,
            risk_score,
            recommendation,
            confidence,
            price_target_7d: None,
            price_target_30d: Some(110.0),
            reasoning: format!("{symbol} looks constructive"),
            key_factors: vec!["Earnings momentum".into(), "AI demand".into()],
            provider: "anthropic".into(),
        }
    }

    pub fn record(
        symbol: &str,
        category: Category,
        recommendation: Recommendation,
        confidence: f64,
        risk_score: f64,
    ) -> StockRecord {
        StockRecord {
            snapshot: snapshot(symbol, category, 100.0),
            analysis: Some(analysis(symbol, category, recommendation, confidence, risk_score)),
        }
    }
}
