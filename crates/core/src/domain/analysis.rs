use crate::domain::market::{Category, StockSnapshot};
use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    #[serde(alias = "bullish", alias = "Bullish")]
    Bullish,
    #[serde(alias = "bearish", alias = "Bearish")]
    Bearish,
    #[serde(alias = "sideways", alias = "Sideways")]
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    #[serde(alias = "buy", alias = "Buy")]
    Buy,
    #[serde(alias = "hold", alias = "Hold")]
    Hold,
    #[serde(alias = "sell", alias = "Sell")]
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub date: NaiveDate,
    pub category: Category,
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub risk_score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub price_target_7d: Option<f64>,
    pub price_target_30d: Option<f64>,
    pub reasoning: String,
    pub key_factors: Vec<String>,
    pub provider: String,
}

impl AnalysisResult {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (field, v) in [
            ("trend_strength", self.trend_strength),
            ("risk_score", self.risk_score),
            ("confidence", self.confidence),
        ] {
            ensure!(
                (0.0..=1.0).contains(&v),
                "{field} must be between 0 and 1 (got {v})"
            );
        }
        for (field, v) in [
            ("price_target_7d", self.price_target_7d),
            ("price_target_30d", self.price_target_30d),
        ] {
            if let Some(v) = v {
                ensure!(v.is_finite() && v > 0.0, "{field} must be positive (got {v})");
            }
        }
        ensure!(!self.reasoning.trim().is_empty(), "reasoning must be non-empty");
        Ok(())
    }

    pub fn is_actionable(&self, confidence_threshold: f64) -> bool {
        self.recommendation == Recommendation::Buy && self.confidence >= confidence_threshold
    }
}

/// Per (date, symbol) record kept by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub snapshot: StockSnapshot,
    pub analysis: Option<AnalysisResult>,
}

impl StockRecord {
    pub fn symbol(&self) -> &str {
        &self.snapshot.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(confidence: f64) -> AnalysisResult {
        AnalysisResult {
            symbol: "AAPL".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 29).unwrap(),
            category: Category::Stable,
            trend_direction: TrendDirection::Bullish,
            trend_strength: 0.7,
            risk_score: 0.3,
            recommendation: Recommendation::Buy,
            confidence,
            price_target_7d: None,
            price_target_30d: Some(220.0),
            reasoning: "Strong services growth".into(),
            key_factors: vec!["Services".into()],
            provider: "anthropic".into(),
        }
    }

    #[test]
    fn rejects_out_of_range_scores() {
        assert!(result(0.85).validate().is_ok());
        assert!(result(1.2).validate().is_err());
        let mut r = result(0.5);
        r.price_target_30d = Some(-3.0);
        assert!(r.validate().is_err());
    }

    #[test]
    fn actionable_requires_buy_and_threshold() {
        assert!(result(0.6).is_actionable(0.6));
        assert!(!result(0.59).is_actionable(0.6));
        let mut r = result(0.9);
        r.recommendation = Recommendation::Hold;
        assert!(!r.is_actionable(0.6));
    }

    #[test]
    fn enums_accept_lowercase_on_input() {
        let t: TrendDirection = serde_json::from_str("\"bullish\"").unwrap();
        assert_eq!(t, TrendDirection::Bullish);
        assert_eq!(serde_json::to_string(&Recommendation::Sell).unwrap(), "\"SELL\"");
        assert!(serde_json::from_str::<Recommendation>("\"STRONG_BUY\"").is_err());
    }
}
