use crate::domain::analysis::AnalysisResult;
use crate::domain::market::Category;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketSentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl MarketSentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketSentiment::Positive => "POSITIVE",
            MarketSentiment::Negative => "NEGATIVE",
            MarketSentiment::Neutral => "NEUTRAL",
            MarketSentiment::Mixed => "MIXED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub sentiment: MarketSentiment,
    pub themes: Vec<String>,
}

/// Allocation-bearing view of an [`AnalysisResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecommendation {
    pub symbol: String,
    pub category: Category,
    pub allocation: u32,
    pub confidence: f64,
    pub risk_score: f64,
    pub entry_price: f64,
    pub price_target_30d: Option<f64>,
    pub expected_return_30d: Option<f64>,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub provider: String,
}

impl StockRecommendation {
    pub fn from_analysis(analysis: &AnalysisResult, allocation: u32, entry_price: f64) -> Self {
        let expected_return_30d = analysis
            .price_target_30d
            .filter(|_| entry_price > 0.0)
            .map(|target| round2((target - entry_price) / entry_price * 100.0));
        Self {
            symbol: analysis.symbol.clone(),
            category: analysis.category,
            allocation,
            confidence: analysis.confidence,
            risk_score: analysis.risk_score,
            entry_price,
            price_target_30d: analysis.price_target_30d,
            expected_return_30d,
            reasoning: analysis.reasoning.clone(),
            key_factors: analysis.key_factors.clone(),
            provider: analysis.provider.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub universe_size: usize,
    pub stable_count: usize,
    pub risky_count: usize,
    pub analyzed_count: usize,
    pub skipped: Vec<SkippedSymbol>,
    pub fallback_count: usize,
    pub complete_snapshots: usize,
    pub data_quality_score: f64,
    /// Run wall time. The only field that differs between two runs over the
    /// same stored inputs.
    pub elapsed_seconds: f64,
    pub stable_filled: bool,
    pub risky_filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub report_id: String,
    pub date: NaiveDate,
    pub market_overview: MarketOverview,
    pub stable_recommendation: Option<StockRecommendation>,
    pub risky_recommendation: Option<StockRecommendation>,
    pub market_risks: Vec<String>,
    pub stats: ProcessingStats,
}

impl DailyReport {
    pub fn recommendation(&self, category: Category) -> Option<&StockRecommendation> {
        match category {
            Category::Stable => self.stable_recommendation.as_ref(),
            Category::Risky => self.risky_recommendation.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentRecommendations {
    pub date: NaiveDate,
    pub stable: Option<StockRecommendation>,
    pub risky: Option<StockRecommendation>,
    pub market_context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_recommendations: usize,
    pub stable_picks_count: usize,
    pub risky_picks_count: usize,
    pub avg_confidence_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPerformer {
    pub symbol: String,
    pub frequency: usize,
    pub avg_confidence: f64,
    /// Mean subsequent return in percent, when a later close is on record.
    pub avg_return: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub report_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_analyzed: usize,
    pub insufficient_data: bool,
    pub performance_metrics: PerformanceMetrics,
    pub top_stable_performers: Vec<TopPerformer>,
    pub top_risky_performers: Vec<TopPerformer>,
    pub dominant_themes: Vec<String>,
    pub sentiment_breakdown: BTreeMap<MarketSentiment, usize>,
    pub insights: Vec<String>,
    pub outlook: String,
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
