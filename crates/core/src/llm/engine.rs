use crate::config::env_parse;
use crate::domain::analysis::AnalysisResult;
use crate::domain::market::StockSnapshot;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::rules::fallback_analysis;
use crate::llm::{AnalysisRequest, LlmClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            call_timeout: Duration::from_secs(90),
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(300),
        }
    }
}

impl EngineOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Some(v) = env_parse::<u32>("ANALYSIS_MAX_ATTEMPTS") {
            out.max_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("ANALYSIS_BACKOFF_BASE_MS") {
            out.backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("ANALYSIS_CALL_TIMEOUT_SECS") {
            out.call_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("ANALYSIS_BREAKER_THRESHOLD") {
            out.breaker_threshold = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("ANALYSIS_BREAKER_COOLDOWN_SECS") {
            out.breaker_cooldown = Duration::from_secs(v);
        }
        out
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Returns true when this failure trips (or re-trips) the breaker.
    fn record_failure(&mut self, now: Instant, threshold: u32, cooldown: Duration) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= threshold {
            self.open_until = Some(now + cooldown);
            return true;
        }
        false
    }
}

struct ProviderSlot {
    client: Arc<dyn LlmClient>,
    breaker: Mutex<BreakerState>,
}

/// Ordered provider failover with per-provider retries and circuit breaking.
/// Never fails: exhausting every provider yields the rule-based fallback.
pub struct AnalysisEngine {
    providers: Vec<ProviderSlot>,
    opts: EngineOptions,
}

impl AnalysisEngine {
    pub fn new(clients: Vec<Arc<dyn LlmClient>>, opts: EngineOptions) -> Self {
        let providers = clients
            .into_iter()
            .map(|client| ProviderSlot {
                client,
                breaker: Mutex::new(BreakerState::default()),
            })
            .collect();
        Self { providers, opts }
    }

    pub async fn analyze(&self, snapshot: &StockSnapshot) -> AnalysisResult {
        for slot in &self.providers {
            let provider = slot.client.provider();
            if slot.breaker.lock().await.is_open(Instant::now()) {
                tracing::debug!(symbol = %snapshot.symbol, %provider, "circuit open; skipping provider");
                continue;
            }

            match self.try_provider(slot.client.as_ref(), snapshot).await {
                Some(mut result) => {
                    slot.breaker.lock().await.record_success();
                    // Identity fields always come from the snapshot.
                    result.symbol = snapshot.symbol.clone();
                    result.date = snapshot.date;
                    result.category = snapshot.category;
                    result.provider = provider.as_str().to_string();
                    return result;
                }
                None => {
                    let tripped = slot.breaker.lock().await.record_failure(
                        Instant::now(),
                        self.opts.breaker_threshold,
                        self.opts.breaker_cooldown,
                    );
                    if tripped {
                        tracing::warn!(
                            %provider,
                            cooldown = ?self.opts.breaker_cooldown,
                            "provider exhausted repeatedly; circuit opened"
                        );
                    }
                }
            }
        }

        tracing::warn!(symbol = %snapshot.symbol, "all analysis providers exhausted; using rule-based fallback");
        fallback_analysis(snapshot)
    }

    async fn try_provider(
        &self,
        client: &dyn LlmClient,
        snapshot: &StockSnapshot,
    ) -> Option<AnalysisResult> {
        let provider = client.provider();
        let mut req = AnalysisRequest::new(snapshot.clone());

        for attempt in 1..=self.opts.max_attempts {
            let outcome = tokio::time::timeout(self.opts.call_timeout, client.analyze(&req)).await;
            let err = match outcome {
                Ok(Ok(result)) => match result.validate() {
                    Ok(()) => return Some(result),
                    Err(err) => err,
                },
                Ok(Err(err)) => err,
                Err(_) => anyhow::anyhow!("analysis call timed out after {:?}", self.opts.call_timeout),
            };
            // A repair prompt may only quote the attempt that just failed.
            req.previous_output = err
                .downcast_ref::<LlmDiagnosticsError>()
                .and_then(|diag| diag.repairable_output())
                .map(str::to_string);

            tracing::warn!(
                symbol = %snapshot.symbol,
                %provider,
                attempt,
                error = %format!("{err:#}"),
                "analysis attempt failed"
            );

            if attempt < self.opts.max_attempts {
                let backoff = self.opts.backoff_base * (1u32 << (attempt - 1).min(16));
                tokio::time::sleep(backoff).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Recommendation;
    use crate::domain::market::Category;
    use crate::fixtures::{analysis, snapshot};
    use crate::llm::Provider;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        Succeed,
        Fail,
        MalformedThenSucceed,
        MalformedThenOutageThenSucceed,
    }

    struct FakeClient {
        provider: Provider,
        behavior: Behavior,
        calls: AtomicU32,
        saw_repair: AtomicU32,
    }

    impl FakeClient {
        fn new(provider: Provider, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                provider,
                behavior,
                calls: AtomicU32::new(0),
                saw_repair: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for FakeClient {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn analyze(&self, req: &AnalysisRequest) -> anyhow::Result<AnalysisResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if req.previous_output.is_some() {
                self.saw_repair.fetch_add(1, Ordering::SeqCst);
            }
            let ok = || {
                let mut r = analysis(&req.snapshot.symbol, Category::Stable, Recommendation::Buy, 0.8, 0.2);
                // Wrong on purpose: the engine owns identity fields.
                r.category = Category::Risky;
                r.provider = "whatever".into();
                Ok(r)
            };
            match self.behavior {
                Behavior::Succeed => ok(),
                Behavior::Fail => anyhow::bail!("HTTP 503"),
                Behavior::MalformedThenSucceed if n == 0 => Err(LlmDiagnosticsError {
                    provider: self.provider,
                    stage: "parse",
                    detail: "not json".into(),
                    raw_output: Some("{\"recommendation\": ".into()),
                    raw_response_json: None,
                }
                .into()),
                Behavior::MalformedThenSucceed => ok(),
                Behavior::MalformedThenOutageThenSucceed => match n {
                    0 => Err(LlmDiagnosticsError {
                        provider: self.provider,
                        stage: "parse",
                        detail: "not json".into(),
                        raw_output: Some("{\"recommendation\": ".into()),
                        raw_response_json: None,
                    }
                    .into()),
                    1 => anyhow::bail!("HTTP 503"),
                    _ => ok(),
                },
            }
        }
    }

    fn opts() -> EngineOptions {
        EngineOptions {
            backoff_base: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_to_second_provider() {
        let primary = FakeClient::new(Provider::Anthropic, Behavior::Fail);
        let secondary = FakeClient::new(Provider::OpenAI, Behavior::Succeed);
        let clients: Vec<Arc<dyn LlmClient>> = vec![
            primary.clone() as Arc<dyn LlmClient>,
            secondary.clone() as Arc<dyn LlmClient>,
        ];
        let engine = AnalysisEngine::new(clients, opts());

        let r = engine.analyze(&snapshot("AAPL", Category::Stable, 210.0)).await;
        assert_eq!(r.provider, "openai");
        assert_eq!(r.category, Category::Stable);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repairs_malformed_output() {
        let client = FakeClient::new(Provider::Anthropic, Behavior::MalformedThenSucceed);
        let engine = AnalysisEngine::new(vec![client.clone() as Arc<dyn LlmClient>], opts());

        let r = engine.analyze(&snapshot("MSFT", Category::Stable, 512.0)).await;
        assert_eq!(r.provider, "anthropic");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.saw_repair.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repair_output_is_dropped_after_a_plain_failure() {
        let client = FakeClient::new(Provider::Anthropic, Behavior::MalformedThenOutageThenSucceed);
        let engine = AnalysisEngine::new(vec![client.clone() as Arc<dyn LlmClient>], opts());

        let r = engine.analyze(&snapshot("MSFT", Category::Stable, 512.0)).await;
        assert_eq!(r.provider, "anthropic");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        // Only the attempt right after the malformed reply is a repair.
        assert_eq!(client.saw_repair.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_providers_failing_yields_hold_fallback() {
        let clients: Vec<Arc<dyn LlmClient>> = vec![
            FakeClient::new(Provider::Anthropic, Behavior::Fail) as Arc<dyn LlmClient>,
            FakeClient::new(Provider::OpenAI, Behavior::Fail) as Arc<dyn LlmClient>,
        ];
        let engine = AnalysisEngine::new(clients, opts());
        let r = engine.analyze(&snapshot("TSLA", Category::Risky, 320.0)).await;
        assert_eq!(r.recommendation, Recommendation::Hold);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.category, Category::Risky);
        assert_eq!(r.provider, "rules");
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_skips_provider_until_cooldown() {
        let failing = FakeClient::new(Provider::Anthropic, Behavior::Fail);
        let engine = AnalysisEngine::new(vec![failing.clone() as Arc<dyn LlmClient>], opts());
        let snap = snapshot("COIN", Category::Risky, 380.0);

        for _ in 0..3 {
            engine.analyze(&snap).await;
        }
        assert_eq!(failing.calls.load(Ordering::SeqCst), 9);

        // Open: no further calls.
        engine.analyze(&snap).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 9);

        // Half-open after the cooldown: one more round is attempted.
        tokio::time::advance(Duration::from_secs(301)).await;
        engine.analyze(&snap).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 12);
    }
}
