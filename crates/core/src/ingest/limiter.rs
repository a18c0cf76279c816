use crate::config::env_parse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const ALPHA_VANTAGE: &str = "alpha_vantage";
pub const YAHOO: &str = "yahoo";
pub const NEWSAPI: &str = "newsapi";

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every task that talks to one provider.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `calls` per `per`, starting full (bursts up to `calls`).
    pub fn new(name: impl Into<String>, calls: u32, per: Duration) -> Self {
        let max_tokens = f64::from(calls.max(1));
        let per_secs = per.as_secs_f64().max(0.001);
        Self {
            name: name.into(),
            max_tokens,
            refill_rate: max_tokens / per_secs,
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate)
            };
            tracing::debug!(provider = %self.name, ?wait, "rate limited; waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        bucket.last_refill = now;
    }
}

/// Limiters keyed by provider identity.
#[derive(Debug, Clone, Default)]
pub struct RateLimiters {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published free-tier ceilings, overridable with `RATE_LIMIT_<PROVIDER>="<n>/<secs>"`.
    pub fn from_env() -> Self {
        let mut out = Self::new();
        for (provider, calls, secs) in [(ALPHA_VANTAGE, 5, 60), (YAHOO, 60, 60), (NEWSAPI, 30, 60)] {
            let key = format!("RATE_LIMIT_{}", provider.to_ascii_uppercase());
            let (calls, secs) = env_parse::<String>(&key)
                .and_then(|s| parse_rate(&s))
                .unwrap_or((calls, secs));
            out = out.with(provider, calls, Duration::from_secs(secs));
        }
        out
    }

    pub fn with(mut self, provider: &str, calls: u32, per: Duration) -> Self {
        self.limiters
            .insert(provider.to_string(), Arc::new(RateLimiter::new(provider, calls, per)));
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(provider).cloned()
    }
}

fn parse_rate(s: &str) -> Option<(u32, u64)> {
    let (calls, secs) = s.split_once('/')?;
    let calls = calls.trim().parse::<u32>().ok().filter(|n| *n > 0)?;
    let secs = secs.trim().parse::<u64>().ok().filter(|n| *n > 0)?;
    Some((calls, secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_strings() {
        assert_eq!(parse_rate("5/60"), Some((5, 60)));
        assert_eq!(parse_rate(" 30 / 1 "), Some((30, 1)));
        assert_eq!(parse_rate("0/60"), None);
        assert_eq!(parse_rate("fast"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_then_throttles() {
        let limiter = RateLimiter::new("alpha_vantage", 5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
        assert!(!limiter.try_acquire().await);

        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(12), "waited {waited:?}");
        assert!(waited < Duration::from_secs(13), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_caps_concurrent_callers() {
        let limiters = RateLimiters::new().with("alpha_vantage", 5, Duration::from_secs(60));
        let limiter = limiters.get("alpha_vantage").unwrap();
        let start = Instant::now();

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let l = limiter.clone();
            set.spawn(async move {
                l.acquire().await;
                Instant::now()
            });
        }
        let mut times = Vec::new();
        while let Some(t) = set.join_next().await {
            times.push(t.unwrap().duration_since(start));
        }
        times.sort();
        // Within any 60s window starting at zero only the initial burst fits.
        let in_first_window = times.iter().filter(|t| **t < Duration::from_secs(12)).count();
        assert_eq!(in_first_window, 5);
        assert!(times[9] >= Duration::from_secs(60));
        assert!(limiters.get("yahoo").is_none());
    }
}
