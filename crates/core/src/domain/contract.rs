use crate::domain::analysis::{AnalysisResult, Recommendation, TrendDirection};
use crate::domain::market::StockSnapshot;
use anyhow::ensure;
use serde::{Deserialize, Serialize};

const MAX_KEY_FACTORS: usize = 5;
const MAX_REASONING_CHARS: usize = 1_000;

/// What a model is asked to emit for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub trend_direction: TrendDirection,
    pub trend_strength: f64,
    pub risk_score: f64,
    pub recommendation: Recommendation,
    #[serde(alias = "confidence_level")]
    pub confidence: f64,
    #[serde(default)]
    pub price_target_7d: Option<f64>,
    #[serde(default)]
    pub price_target_30d: Option<f64>,
    #[serde(default)]
    pub key_factors: Vec<String>,
    pub reasoning: String,
}

impl LlmAnalysis {
    pub fn validate_and_into_result(
        self,
        snapshot: &StockSnapshot,
        provider: &str,
    ) -> anyhow::Result<AnalysisResult> {
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
                ensure!(v.is_finite() && v > 0.0, "{field} must be positive or null (got {v})");
            }
        }

        let reasoning = self.reasoning.trim();
        ensure!(!reasoning.is_empty(), "reasoning must be non-empty");
        let reasoning: String = reasoning.chars().take(MAX_REASONING_CHARS).collect();

        let key_factors: Vec<String> = self
            .key_factors
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_KEY_FACTORS)
            .collect();

        Ok(AnalysisResult {
            symbol: snapshot.symbol.clone(),
            date: snapshot.date,
            category: snapshot.category,
            trend_direction: self.trend_direction,
            trend_strength: self.trend_strength,
            risk_score: self.risk_score,
            recommendation: self.recommendation,
            confidence: self.confidence,
            price_target_7d: self.price_target_7d,
            price_target_30d: self.price_target_30d,
            reasoning,
            key_factors,
            provider: provider.to_string(),
        })
    }
}
