use crate::domain::market::Category;
use crate::domain::report::{
    round2, DailyReport, MarketSentiment, PerformanceMetrics, StockRecommendation, SummaryReport,
    TopPerformer,
};
use crate::selector::{normalize_theme, rank_counts};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeMap;

const TOP_PERFORMERS: usize = 5;
const DOMINANT_THEMES: usize = 5;

/// Realized return (percent) of a pick made on `date`, keyed by `(date, symbol)`.
pub type SubsequentReturns = BTreeMap<(NaiveDate, String), f64>;

pub fn build_summary_report(
    start: NaiveDate,
    end: NaiveDate,
    reports: &[DailyReport],
    returns: &SubsequentReturns,
) -> SummaryReport {
    let mut reports: Vec<&DailyReport> = reports
        .iter()
        .filter(|r| r.date >= start && r.date <= end)
        .collect();
    reports.sort_by_key(|r| r.date);

    let report_id = format!("SR_{end}");
    if reports.is_empty() {
        return SummaryReport {
            report_id,
            start_date: start,
            end_date: end,
            days_analyzed: 0,
            insufficient_data: true,
            performance_metrics: PerformanceMetrics::default(),
            top_stable_performers: Vec::new(),
            top_risky_performers: Vec::new(),
            dominant_themes: Vec::new(),
            sentiment_breakdown: BTreeMap::new(),
            insights: vec![format!("No daily reports were recorded between {start} and {end}.")],
            outlook: format!("Insufficient data: no daily reports between {start} and {end}."),
        };
    }

    let stable_picks = picks(&reports, Category::Stable);
    let risky_picks = picks(&reports, Category::Risky);

    let all_confidences: Vec<f64> = stable_picks
        .iter()
        .chain(risky_picks.iter())
        .map(|(_, r)| r.confidence)
        .collect();
    let performance_metrics = PerformanceMetrics {
        total_recommendations: all_confidences.len(),
        stable_picks_count: stable_picks.len(),
        risky_picks_count: risky_picks.len(),
        avg_confidence_score: mean(&all_confidences).map(round2).unwrap_or(0.0),
    };

    let mut theme_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut sentiment_breakdown: BTreeMap<MarketSentiment, usize> = BTreeMap::new();
    for r in &reports {
        for theme in &r.market_overview.themes {
            let key = normalize_theme(theme);
            if !key.is_empty() {
                *theme_counts.entry(key).or_default() += 1;
            }
        }
        *sentiment_breakdown.entry(r.market_overview.sentiment).or_default() += 1;
    }
    let dominant_themes = rank_counts(theme_counts, DOMINANT_THEMES);

    let top_stable_performers = top_performers(&stable_picks, returns);
    let top_risky_performers = top_performers(&risky_picks, returns);

    let insights = insights(&reports, &performance_metrics, &top_stable_performers, &top_risky_performers);
    let outlook = outlook(&sentiment_breakdown, &dominant_themes, &top_stable_performers, &top_risky_performers);

    SummaryReport {
        report_id,
        start_date: start,
        end_date: end,
        days_analyzed: reports.len(),
        insufficient_data: false,
        performance_metrics,
        top_stable_performers,
        top_risky_performers,
        dominant_themes,
        sentiment_breakdown,
        insights,
        outlook,
    }
}

fn picks<'a>(reports: &[&'a DailyReport], category: Category) -> Vec<(NaiveDate, &'a StockRecommendation)> {
    reports
        .iter()
        .copied()
        .filter_map(|r| r.recommendation(category).map(|rec| (r.date, rec)))
        .collect()
}

/// Frequency desc, then mean realized return desc (known before unknown), then symbol.
fn top_performers(
    picks: &[(NaiveDate, &StockRecommendation)],
    returns: &SubsequentReturns,
) -> Vec<TopPerformer> {
    let mut by_symbol: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for (date, rec) in picks {
        let entry = by_symbol.entry(rec.symbol.as_str()).or_default();
        entry.0.push(rec.confidence);
        if let Some(ret) = returns.get(&(*date, rec.symbol.clone())) {
            entry.1.push(*ret);
        }
    }

    let mut out: Vec<TopPerformer> = by_symbol
        .into_iter()
        .map(|(symbol, (confidences, rets))| TopPerformer {
            symbol: symbol.to_string(),
            frequency: confidences.len(),
            avg_confidence: mean(&confidences).map(round2).unwrap_or(0.0),
            avg_return: mean(&rets).map(round2),
        })
        .collect();

    out.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| match (a.avg_return, b.avg_return) {
                (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    out.truncate(TOP_PERFORMERS);
    out
}

fn insights(
    reports: &[&DailyReport],
    metrics: &PerformanceMetrics,
    top_stable: &[TopPerformer],
    top_risky: &[TopPerformer],
) -> Vec<String> {
    let mut out = Vec::new();
    let days = reports.len();

    let avg = metrics.avg_confidence_score;
    if metrics.total_recommendations == 0 {
        out.push("No stock met the confidence threshold during the period.".to_string());
    } else if avg >= 0.8 {
        out.push(format!("High-conviction period: average pick confidence {avg:.2}."));
    } else if avg < 0.7 {
        out.push(format!("Low-conviction period: average pick confidence {avg:.2}; consider smaller positions."));
    } else {
        out.push(format!("Moderate conviction: average pick confidence {avg:.2}."));
    }

    out.push(format!(
        "Stable picks on {} of {days} days; risky picks on {} of {days} days.",
        metrics.stable_picks_count, metrics.risky_picks_count
    ));

    for (label, top) in [("stable", top_stable), ("risky", top_risky)] {
        if let Some(first) = top.first().filter(|p| p.frequency > 1) {
            out.push(format!(
                "{} was the most consistent {label} pick ({} days).",
                first.symbol, first.frequency
            ));
        }
    }

    let quality: Vec<f64> = reports.iter().map(|r| r.stats.data_quality_score).collect();
    if let Some(q) = mean(&quality).filter(|q| *q < 0.8) {
        out.push(format!("Average data coverage was {:.0}%; some analyses ran on partial data.", q * 100.0));
    }
    let fallbacks: usize = reports.iter().map(|r| r.stats.fallback_count).sum();
    if fallbacks > 0 {
        out.push(format!("{fallbacks} analyses fell back to the rule-based assessment."));
    }
    out
}

fn outlook(
    sentiment: &BTreeMap<MarketSentiment, usize>,
    themes: &[String],
    top_stable: &[TopPerformer],
    top_risky: &[TopPerformer],
) -> String {
    let dominant = sentiment
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(s, _)| *s)
        .unwrap_or(MarketSentiment::Neutral);

    let tone = match dominant {
        MarketSentiment::Positive => "Sentiment was predominantly positive; expect continued strength with selective entries.",
        MarketSentiment::Negative => "Sentiment was predominantly negative; favor defensive positioning and smaller risky allocations.",
        MarketSentiment::Neutral => "Sentiment was largely neutral; expect range-bound conditions.",
        MarketSentiment::Mixed => "Sentiment was mixed; expect rotation rather than a broad trend.",
    };

    let mut parts = vec![tone.to_string()];
    if !themes.is_empty() {
        parts.push(format!("Themes to watch: {}.", themes.join(", ")));
    }
    let leaders: Vec<&str> = top_stable
        .first()
        .into_iter()
        .chain(top_risky.first())
        .map(|p| p.symbol.as_str())
        .collect();
    if !leaders.is_empty() {
        parts.push(format!("Recurring picks: {}.", leaders.join(", ")));
    }
    parts.join(" ")
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
