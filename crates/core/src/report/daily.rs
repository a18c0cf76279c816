use crate::domain::analysis::{Recommendation, StockRecord};
use crate::domain::market::Category;
use crate::domain::report::{round2, DailyReport, ProcessingStats, SkippedSymbol};
use crate::domain::universe::Universe;
use crate::llm::rules;
use crate::selector::{select, SelectorOptions};
use chrono::NaiveDate;
use std::time::Duration;

const SELL_BREADTH: f64 = 0.3;
const HIGH_RISK_SCORE: f64 = 0.7;
const HIGH_RISK_BREADTH: f64 = 0.4;
const LOW_DATA_QUALITY: f64 = 0.5;

/// Pure aggregation of one run. Output depends only on the arguments, and
/// record order does not matter.
pub fn build_daily_report(
    date: NaiveDate,
    universe: &Universe,
    records: &[StockRecord],
    skipped: &[SkippedSymbol],
    elapsed: Duration,
    opts: &SelectorOptions,
) -> DailyReport {
    let mut records: Vec<StockRecord> = records.to_vec();
    records.sort_by(|a, b| a.symbol().cmp(b.symbol()));
    let mut skipped: Vec<SkippedSymbol> = skipped.to_vec();
    skipped.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    skipped.dedup_by(|a, b| a.symbol == b.symbol);

    let selection = select(&records, opts);

    let analyzed: Vec<_> = records.iter().filter_map(|r| r.analysis.as_ref()).collect();
    let fallback_count = analyzed
        .iter()
        .filter(|a| a.provider == rules::PROVIDER_NAME)
        .count();
    let complete_snapshots = records.iter().filter(|r| r.snapshot.is_complete()).count();
    let data_quality_score = if universe.is_empty() {
        0.0
    } else {
        round2(complete_snapshots as f64 / universe.len() as f64)
    };

    let stats = ProcessingStats {
        universe_size: universe.len(),
        stable_count: universe.stable.len(),
        risky_count: universe.risky.len(),
        analyzed_count: analyzed.len(),
        skipped,
        fallback_count,
        complete_snapshots,
        data_quality_score,
        elapsed_seconds: round2(elapsed.as_secs_f64()),
        stable_filled: selection.stable.is_some(),
        risky_filled: selection.risky.is_some(),
    };

    let market_risks = market_risks(&records, &stats);

    DailyReport {
        report_id: format!("DR_{date}"),
        date,
        market_overview: selection.market_overview,
        stable_recommendation: selection.stable,
        risky_recommendation: selection.risky,
        market_risks,
        stats,
    }
}

fn market_risks(records: &[StockRecord], stats: &ProcessingStats) -> Vec<String> {
    let analyzed: Vec<_> = records.iter().filter_map(|r| r.analysis.as_ref()).collect();
    let mut risks = Vec::new();

    if !analyzed.is_empty() {
        let n = analyzed.len() as f64;
        let sells = analyzed
            .iter()
            .filter(|a| a.recommendation == Recommendation::Sell)
            .count() as f64;
        if sells / n > SELL_BREADTH {
            risks.push(format!(
                "Broad market weakness: {:.0}% of analyzed stocks rated SELL",
                sells / n * 100.0
            ));
        }
        let high_risk = analyzed
            .iter()
            .filter(|a| a.risk_score > HIGH_RISK_SCORE)
            .count() as f64;
        if high_risk / n > HIGH_RISK_BREADTH {
            risks.push(format!(
                "Elevated market volatility: {:.0}% of analyzed stocks carry high risk scores",
                high_risk / n * 100.0
            ));
        }
    }

    if stats.universe_size > 0 && stats.data_quality_score < LOW_DATA_QUALITY {
        risks.push(format!(
            "Limited data coverage: only {} of {} stocks had complete data",
            stats.complete_snapshots, stats.universe_size
        ));
    }
    if stats.fallback_count > 0 {
        risks.push(format!(
            "{} stocks were assessed by the rule-based fallback",
            stats.fallback_count
        ));
    }
    for (category, filled) in [
        (Category::Stable, stats.stable_filled),
        (Category::Risky, stats.risky_filled),
    ] {
        if !filled {
            risks.push(format!(
                "No {} candidate met the confidence threshold",
                category.as_str().to_lowercase()
            ));
        }
    }
    risks
}
