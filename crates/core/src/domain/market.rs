use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Stable,
    Risky,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Stable, Category::Risky];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Stable => "STABLE",
            Category::Risky => "RISKY",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub previous_close: Option<f64>,
    pub change_percent: Option<f64>,
}

impl PriceData {
    /// OHLC bars must be finite, non-negative and internally consistent.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (field, v) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            ensure!(v.is_finite() && v >= 0.0, "{field} must be a non-negative number (got {v})");
        }
        ensure!(
            self.low <= self.open.min(self.close),
            "low {} above open/close ({}, {})",
            self.low,
            self.open,
            self.close
        );
        ensure!(
            self.open.max(self.close) <= self.high,
            "high {} below open/close ({}, {})",
            self.high,
            self.open,
            self.close
        );
        if let Some(prev) = self.previous_close {
            ensure!(prev.is_finite() && prev >= 0.0, "previous_close must be non-negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub volume_sma_20: Option<f64>,
}

impl TechnicalIndicators {
    pub fn is_empty(&self) -> bool {
        *self == TechnicalIndicators::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalData {
    pub pe_ratio: Option<f64>,
    pub market_cap: Option<u64>,
    pub dividend_yield: Option<f64>,
    pub eps_ttm: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub debt_to_equity: Option<f64>,
}

impl FundamentalData {
    pub fn is_empty(&self) -> bool {
        *self == FundamentalData::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentData {
    pub news_sentiment_score: Option<f64>,
    pub news_articles_count: Option<u32>,
    pub social_sentiment: Option<f64>,
    pub analyst_rating: Option<String>,
}

impl SentimentData {
    /// Scores outside [0, 1] are clamped; non-finite scores become null.
    pub fn normalized(self) -> Self {
        Self {
            news_sentiment_score: self.news_sentiment_score.and_then(clamp_unit),
            social_sentiment: self.social_sentiment.and_then(clamp_unit),
            analyst_rating: self
                .analyst_rating
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty()),
            ..self
        }
    }
}

fn clamp_unit(v: f64) -> Option<f64> {
    v.is_finite().then(|| v.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub symbol: String,
    pub date: NaiveDate,
    pub category: Category,
    pub price: PriceData,
    pub technicals: Option<TechnicalIndicators>,
    pub fundamentals: Option<FundamentalData>,
    pub sentiment: Option<SentimentData>,
}

impl StockSnapshot {
    pub fn is_complete(&self) -> bool {
        self.technicals.is_some() && self.fundamentals.is_some() && self.sentiment.is_some()
    }
}
