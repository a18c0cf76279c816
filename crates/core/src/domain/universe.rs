use crate::domain::market::Category;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub category: Category,
    pub status: SourceStatus,
    pub candidates: usize,
    pub error: Option<String>,
}

/// The per-date watchlist. Older records used `stable_stocks` / `risky_stocks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub date: NaiveDate,
    #[serde(alias = "stable_stocks")]
    pub stable: Vec<String>,
    #[serde(alias = "risky_stocks")]
    pub risky: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceOutcome>,
}

impl Universe {
    pub fn len(&self) -> usize {
        self.stable.len() + self.risky.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn symbols(&self, category: Category) -> &[String] {
        match category {
            Category::Stable => &self.stable,
            Category::Risky => &self.risky,
        }
    }

    pub fn category_of(&self, symbol: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|c| self.symbols(*c).iter().any(|s| s == symbol))
    }

    /// All members with their category, stable first, in ranking order.
    pub fn members(&self) -> impl Iterator<Item = (&str, Category)> + '_ {
        Category::ALL
            .into_iter()
            .flat_map(move |c| self.symbols(c).iter().map(move |s| (s.as_str(), c)))
    }
}

/// Upper-cases and validates a ticker: 1..=6 chars of `A-Z0-9.-`, at least one letter.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let s = raw.trim().to_ascii_uppercase();
    if s.is_empty() || s.len() > 6 {
        return None;
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-')
    {
        return None;
    }
    if !s.chars().any(|c| c.is_ascii_uppercase()) {
        return None;
    }
    if s.starts_with(['.', '-']) || s.ends_with(['.', '-']) {
        return None;
    }
    Some(s)
}
