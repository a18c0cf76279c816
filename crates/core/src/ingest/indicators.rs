//! Technical indicators computed locally from daily bars.

use crate::domain::market::TechnicalIndicators;
use crate::ingest::types::DailyBar;

pub fn compute_indicators(bars: &[DailyBar]) -> TechnicalIndicators {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

    let (macd, macd_signal) = match calculate_macd(&closes, 12, 26, 9) {
        Some((line, signal)) => (Some(line), Some(signal)),
        None => (None, None),
    };
    let (bollinger_upper, bollinger_lower) = match calculate_bollinger(&closes, 20, 2.0) {
        Some((upper, lower)) => (Some(upper), Some(lower)),
        None => (None, None),
    };

    TechnicalIndicators {
        rsi_14: calculate_rsi(&closes, 14),
        macd,
        macd_signal,
        sma_20: calculate_sma(&closes, 20),
        sma_50: calculate_sma(&closes, 50),
        sma_200: calculate_sma(&closes, 200),
        bollinger_upper,
        bollinger_lower,
        volume_sma_20: calculate_sma(&volumes, 20),
    }
}

/// Wilder-smoothed RSI over the whole series.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: &f64| c.max(0.0);
    let loss = |c: &f64| (-c).max(0.0);

    let mut avg_gain = changes.iter().take(period).map(gain).sum::<f64>() / period as f64;
    let mut avg_loss = changes.iter().take(period).map(loss).sum::<f64>() / period as f64;

    for c in &changes[period..] {
        avg_gain = (avg_gain * (period - 1) as f64 + gain(c)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss(c)) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Returns `(macd_line, signal_line)` for the last bar.
pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<(f64, f64)> {
    if prices.len() < slow_period + signal_period - 1 {
        return None;
    }
    let fast = ema_series(prices, fast_period)?;
    let slow = ema_series(prices, slow_period)?;

    // Align both series on the bars where the slow EMA exists.
    let offset = slow_period - fast_period;
    let macd_values: Vec<f64> = slow
        .iter()
        .enumerate()
        .map(|(i, s)| fast[i + offset] - s)
        .collect();

    let signal = ema_series(&macd_values, signal_period)?;
    Some((*macd_values.last()?, *signal.last()?))
}

pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let recent = &values[values.len() - period..];
    Some(recent.iter().sum::<f64>() / period as f64)
}

/// Returns `(upper, lower)` bands around the `period` SMA.
pub fn calculate_bollinger(prices: &[f64], period: usize, k: f64) -> Option<(f64, f64)> {
    let mean = calculate_sma(prices, period)?;
    let recent = &prices[prices.len() - period..];
    let variance = recent.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
    let sd = variance.sqrt();
    Some((mean + k * sd, mean - k * sd))
}

/// EMA seeded with the SMA of the first `period` values; one output per input
/// from index `period - 1` onwards.
fn ema_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(ema);
    for v in &values[period..] {
        ema = (v - ema) * multiplier + ema;
        out.push(ema);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64]) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| DailyBar {
                date: start + chrono::Duration::days(i as i64),
                open: *c,
                high: c + 1.0,
                low: c - 1.0,
                close: *c,
                volume: 1_000 + i as u64,
            })
            .collect()
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(calculate_rsi(&up, 14), Some(100.0));
        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(calculate_rsi(&down, 14).unwrap() < 1e-9);
        assert_eq!(calculate_rsi(&up[..10], 14), None);
    }

    #[test]
    fn sma_and_bollinger() {
        let v: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(calculate_sma(&v, 20), Some(10.5));
        assert_eq!(calculate_sma(&v, 21), None);
        let flat = vec![50.0; 20];
        assert_eq!(calculate_bollinger(&flat, 20, 2.0), Some((50.0, 50.0)));
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + 0.5 * i as f64).collect();
        let (line, signal) = calculate_macd(&up, 12, 26, 9).unwrap();
        assert!(line > 0.0);
        assert!(signal > 0.0);
        assert!(calculate_macd(&up[..30], 12, 26, 9).is_none());
    }

    #[test]
    fn short_history_leaves_long_windows_empty() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 5) as f64).collect();
        let t = compute_indicators(&bars(&closes));
        assert!(t.rsi_14.is_some());
        assert!(t.sma_50.is_some());
        assert!(t.sma_200.is_none());
        assert!(t.bollinger_upper.unwrap() >= t.bollinger_lower.unwrap());
        assert!(t.volume_sma_20.is_some());
    }
}
