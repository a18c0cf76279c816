use crate::config::env_parse;
use crate::domain::analysis::{AnalysisResult, StockRecord};
use crate::domain::market::Category;
use crate::domain::report::{MarketOverview, MarketSentiment, StockRecommendation};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SelectorOptions {
    pub confidence_threshold: f64,
    pub stable_allocation: u32,
    pub risky_allocation: u32,
    pub theme_count: usize,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            stable_allocation: 200,
            risky_allocation: 50,
            theme_count: 3,
        }
    }
}

impl SelectorOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(v) = env_parse::<f64>("CONFIDENCE_THRESHOLD").filter(|v| (0.0..=1.0).contains(v)) {
            out.confidence_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("STABLE_ALLOCATION") {
            out.stable_allocation = v;
        }
        if let Some(v) = env_parse::<u32>("RISKY_ALLOCATION") {
            out.risky_allocation = v;
        }
        out
    }

    pub fn allocation(&self, category: Category) -> u32 {
        match category {
            Category::Stable => self.stable_allocation,
            Category::Risky => self.risky_allocation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub stable: Option<StockRecommendation>,
    pub risky: Option<StockRecommendation>,
    pub market_overview: MarketOverview,
}

pub fn select(records: &[StockRecord], opts: &SelectorOptions) -> Selection {
    let pick = |category: Category| {
        let best = best_candidate(
            records
                .iter()
                .filter_map(|r| r.analysis.as_ref().map(|a| (r, a)))
                .filter(|(_, a)| a.category == category),
            opts.confidence_threshold,
        )?;
        let (record, analysis) = best;
        Some(StockRecommendation::from_analysis(
            analysis,
            opts.allocation(category),
            record.snapshot.price.close,
        ))
    };

    Selection {
        stable: pick(Category::Stable),
        risky: pick(Category::Risky),
        market_overview: market_overview(records, opts.theme_count),
    }
}

/// BUY results at or above the threshold; highest confidence, then lowest risk,
/// then symbol.
fn best_candidate<'a, T>(
    candidates: impl Iterator<Item = (T, &'a AnalysisResult)>,
    threshold: f64,
) -> Option<(T, &'a AnalysisResult)> {
    candidates
        .filter(|(_, a)| a.is_actionable(threshold))
        .min_by(|(_, a), (_, b)| rank_order(a, b))
}

fn rank_order(a: &AnalysisResult, b: &AnalysisResult) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.risk_score.partial_cmp(&b.risk_score).unwrap_or(Ordering::Equal))
        .then_with(|| a.symbol.cmp(&b.symbol))
}

pub fn market_overview(records: &[StockRecord], theme_count: usize) -> MarketOverview {
    let mut counts: BTreeMap<MarketSentiment, usize> = BTreeMap::new();
    for r in records {
        if let Some(label) = symbol_sentiment(r) {
            *counts.entry(label).or_default() += 1;
        }
    }

    let top = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<MarketSentiment> = counts
        .iter()
        .filter(|(_, n)| **n == top)
        .map(|(label, _)| *label)
        .collect();
    let sentiment = match leaders.as_slice() {
        [only] => *only,
        [] => MarketSentiment::Neutral,
        _ => MarketSentiment::Mixed,
    };

    MarketOverview {
        sentiment,
        themes: top_themes(records, theme_count),
    }
}

/// News score when present, otherwise the sign of the day's move.
fn symbol_sentiment(record: &StockRecord) -> Option<MarketSentiment> {
    let news = record
        .snapshot
        .sentiment
        .as_ref()
        .and_then(|s| s.news_sentiment_score);
    if let Some(score) = news {
        return Some(if score > 0.6 {
            MarketSentiment::Positive
        } else if score < 0.4 {
            MarketSentiment::Negative
        } else {
            MarketSentiment::Neutral
        });
    }
    let change = record.snapshot.price.change_percent?;
    Some(if change > 0.0 {
        MarketSentiment::Positive
    } else if change < 0.0 {
        MarketSentiment::Negative
    } else {
        MarketSentiment::Neutral
    })
}

fn top_themes(records: &[StockRecord], n: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for a in records.iter().filter_map(|r| r.analysis.as_ref()) {
        for factor in &a.key_factors {
            let key = normalize_theme(factor);
            if !key.is_empty() {
                *counts.entry(key).or_default() += 1;
            }
        }
    }
    rank_counts(counts, n)
}

pub(crate) fn normalize_theme(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Most frequent first; ties alphabetical.
pub(crate) fn rank_counts(counts: BTreeMap<String, usize>, n: usize) -> Vec<String> {
    let mut v: Vec<(String, usize)> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.into_iter().take(n).map(|(k, _)| k).collect()
}
