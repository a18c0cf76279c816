use anyhow::Result;
use stockpulse_core::config::Settings;
use stockpulse_core::ingest::aggregator::{AggregatorOptions, MarketDataAggregator};
use stockpulse_core::ingest::alpha_vantage::AlphaVantageClient;
use stockpulse_core::ingest::limiter::RateLimiters;
use stockpulse_core::ingest::news::NewsApiClient;
use stockpulse_core::ingest::provider::{FundamentalsProvider, SentimentProvider};
use stockpulse_core::ingest::yahoo::YahooFinanceClient;
use stockpulse_core::llm::anthropic::AnthropicClient;
use stockpulse_core::llm::engine::{AnalysisEngine, EngineOptions};
use stockpulse_core::llm::openai::OpenAiCompatClient;
use stockpulse_core::llm::{parse_provider_order, LlmClient, Provider};
use stockpulse_core::pipeline::{DailyPipeline, PipelineOptions};
use stockpulse_core::selector::SelectorOptions;
use stockpulse_core::service::ReportService;
use stockpulse_core::storage::TimeSeriesStore;
use stockpulse_core::universe::{default_sources, UniverseCollector, UniverseOptions};
use std::sync::Arc;

pub async fn open_store(settings: &Settings) -> Result<Arc<TimeSeriesStore>> {
    Ok(Arc::new(TimeSeriesStore::open(settings.data_dir()).await?))
}

pub async fn report_service(settings: &Settings) -> Result<ReportService> {
    Ok(ReportService::new(open_store(settings).await?))
}

/// Builds every client from settings. Missing optional keys disable that block
/// instead of failing the run.
pub async fn build_pipeline(settings: &Settings, refresh_universe: bool) -> Result<DailyPipeline> {
    let store = open_store(settings).await?;
    let yahoo = Arc::new(YahooFinanceClient::from_settings(settings)?);
    let collector = UniverseCollector::new(default_sources(&yahoo)?, UniverseOptions::from_env());

    let fundamentals: Option<Arc<dyn FundamentalsProvider>> =
        match AlphaVantageClient::from_settings(settings) {
            Ok(c) => Some(Arc::new(c) as Arc<dyn FundamentalsProvider>),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "fundamentals disabled");
                None
            }
        };
    let sentiment: Option<Arc<dyn SentimentProvider>> = match NewsApiClient::from_settings(settings) {
        Ok(c) => Some(Arc::new(c) as Arc<dyn SentimentProvider>),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "news sentiment disabled");
            None
        }
    };

    let aggregator = MarketDataAggregator::new(
        yahoo,
        fundamentals,
        sentiment,
        RateLimiters::from_env(),
        AggregatorOptions::from_env(),
    );
    let engine = AnalysisEngine::new(analysis_clients(settings)?, EngineOptions::from_env());

    let mut opts = PipelineOptions::from_env();
    opts.refresh_universe = refresh_universe;

    Ok(DailyPipeline::new(
        store,
        collector,
        Arc::new(aggregator),
        Arc::new(engine),
        SelectorOptions::from_env(),
        opts,
    ))
}

fn analysis_clients(settings: &Settings) -> Result<Vec<Arc<dyn LlmClient>>> {
    let mut out: Vec<Arc<dyn LlmClient>> = Vec::new();
    for provider in parse_provider_order(settings.analysis_providers.as_deref())? {
        let client = match provider {
            Provider::Anthropic => {
                AnthropicClient::from_settings(settings).map(|c| Arc::new(c) as Arc<dyn LlmClient>)
            }
            Provider::OpenAI => {
                OpenAiCompatClient::from_settings(settings).map(|c| Arc::new(c) as Arc<dyn LlmClient>)
            }
        };
        match client {
            Ok(c) => out.push(c),
            Err(err) => {
                tracing::warn!(%provider, error = %format!("{err:#}"), "analysis provider disabled")
            }
        }
    }
    if out.is_empty() {
        tracing::warn!("no analysis provider configured; every symbol gets the rule-based assessment");
    }
    Ok(out)
}
