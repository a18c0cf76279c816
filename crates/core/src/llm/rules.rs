//! Deterministic analysis used when every model provider is exhausted.

use crate::domain::analysis::{AnalysisResult, Recommendation, TrendDirection};
use crate::domain::market::{Category, StockSnapshot};

pub const PROVIDER_NAME: &str = "rules";

pub fn fallback_analysis(snapshot: &StockSnapshot) -> AnalysisResult {
    let change = snapshot.price.change_percent.unwrap_or(0.0);
    let close = snapshot.price.close;
    let technicals = snapshot.technicals.as_ref();

    let sma_20 = technicals.and_then(|t| t.sma_20);
    let sma_50 = technicals.and_then(|t| t.sma_50);
    let trend_direction = match (sma_20, sma_50) {
        (Some(s20), Some(s50)) if close > s20 && s20 > s50 => TrendDirection::Bullish,
        (Some(s20), Some(s50)) if close < s20 && s20 < s50 => TrendDirection::Bearish,
        _ if change > 2.0 => TrendDirection::Bullish,
        _ if change < -2.0 => TrendDirection::Bearish,
        _ => TrendDirection::Sideways,
    };
    let trend_strength = (change.abs() / 5.0).min(1.0);

    let mut risk: f64 = match snapshot.category {
        Category::Stable => 0.3,
        Category::Risky => 0.6,
    };
    let mut factors = vec!["Rule-based fallback".to_string()];

    if let Some(rsi) = technicals.and_then(|t| t.rsi_14) {
        if !(30.0..=70.0).contains(&rsi) {
            risk += 0.1;
            factors.push(format!("RSI {rsi:.0} at an extreme"));
        }
    }
    if let (Some(upper), Some(lower)) = (
        technicals.and_then(|t| t.bollinger_upper),
        technicals.and_then(|t| t.bollinger_lower),
    ) {
        if close > 0.0 && (upper - lower) / close > 0.2 {
            risk += 0.1;
            factors.push("Wide Bollinger bands".to_string());
        }
    }
    if change.abs() > 5.0 {
        risk += 0.1;
        factors.push(format!("{change:+.1}% daily move"));
    }

    AnalysisResult {
        symbol: snapshot.symbol.clone(),
        date: snapshot.date,
        category: snapshot.category,
        trend_direction,
        trend_strength,
        risk_score: risk.clamp(0.0, 1.0),
        recommendation: Recommendation::Hold,
        confidence: 0.0,
        price_target_7d: None,
        price_target_30d: None,
        reasoning: "No analysis provider was available; conservative rule-based assessment from price and technical data.".to_string(),
        key_factors: factors,
        provider: PROVIDER_NAME.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::snapshot;

    #[test]
    fn always_hold_with_zero_confidence() {
        let r = fallback_analysis(&snapshot("TSLA", Category::Risky, 320.0));
        assert_eq!(r.recommendation, Recommendation::Hold);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.category, Category::Risky);
        assert_eq!(r.provider, PROVIDER_NAME);
        r.validate().unwrap();
    }

    #[test]
    fn trend_follows_moving_averages() {
        // Fixture close sits above SMA-20 above SMA-50.
        let r = fallback_analysis(&snapshot("AAPL", Category::Stable, 210.0));
        assert_eq!(r.trend_direction, TrendDirection::Bullish);
        assert!((r.risk_score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn extremes_raise_risk_without_leaving_unit_range() {
        let mut s = snapshot("SOXL", Category::Risky, 30.0);
        s.price.change_percent = Some(-12.0);
        if let Some(t) = s.technicals.as_mut() {
            t.rsi_14 = Some(18.0);
            t.sma_20 = None;
            t.bollinger_upper = Some(40.0);
            t.bollinger_lower = Some(20.0);
        }
        let r = fallback_analysis(&s);
        assert_eq!(r.trend_direction, TrendDirection::Bearish);
        assert!((r.risk_score - 0.9).abs() < 1e-9);
        assert_eq!(r.trend_strength, 1.0);
        assert!(r.key_factors.len() >= 4);
    }

    #[test]
    fn snapshot_without_technicals_still_analyzed() {
        let mut s = snapshot("PLTR", Category::Risky, 150.0);
        s.technicals = None;
        s.price.change_percent = None;
        let r = fallback_analysis(&s);
        assert_eq!(r.trend_direction, TrendDirection::Sideways);
        assert_eq!(r.trend_strength, 0.0);
    }
}
