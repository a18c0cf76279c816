pub mod anthropic;
pub mod engine;
pub mod error;
pub mod json;
pub mod openai;
pub mod prompt;
pub mod rules;

use crate::domain::analysis::AnalysisResult;
use crate::domain::market::StockSnapshot;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub snapshot: StockSnapshot,
    /// Raw output of the previous failed attempt; asks the model to repair it.
    pub previous_output: Option<String>,
}

impl AnalysisRequest {
    pub fn new(snapshot: StockSnapshot) -> Self {
        Self {
            snapshot,
            previous_output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAI => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" | "llm7" => Ok(Provider::OpenAI),
            other => anyhow::bail!("unknown analysis provider: {other}"),
        }
    }
}

/// Parses `ANALYSIS_PROVIDERS` ("openai,anthropic") into a deduplicated priority list.
pub fn parse_provider_order(raw: Option<&str>) -> anyhow::Result<Vec<Provider>> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(vec![Provider::Anthropic, Provider::OpenAI]);
    };
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let p = part.parse::<Provider>()?;
        if !out.contains(&p) {
            out.push(p);
        }
    }
    Ok(out)
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    async fn analyze(&self, req: &AnalysisRequest) -> anyhow::Result<AnalysisResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_order_defaults_and_dedupes() {
        assert_eq!(
            parse_provider_order(None).unwrap(),
            vec![Provider::Anthropic, Provider::OpenAI]
        );
        assert_eq!(
            parse_provider_order(Some("openai, anthropic,openai")).unwrap(),
            vec![Provider::OpenAI, Provider::Anthropic]
        );
        assert!(parse_provider_order(Some("gemini")).is_err());
    }
}
