use crate::clock::Clock;
use crate::store::CounterStore;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of a single `check_limit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Calls still admissible after this one in the current window/bucket.
    pub remaining: u64,
    /// Epoch millis when the budget is (at least partially) restored.
    pub reset_at: u64,
    pub limit: u64,
    /// Admitted only because the counter store was unreachable.
    pub fail_open: bool,
}

impl RateLimitDecision {
    /// Admit-by-default decision used when the counter store is down.
    pub fn fail_open(limit: u64, now_ms: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at: now_ms,
            limit,
            fail_open: true,
        }
    }
}

/// A caller-keyed admission policy.
///
/// Implementations never surface store errors: an unreachable store admits
/// the call and logs a warning.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_limit(&self, key: &str) -> RateLimitDecision;

    fn name(&self) -> &'static str;
}

pub(crate) fn log_fail_open(limiter: &'static str, key: &str, err: &Error) {
    warn!(limiter, key = %key, error = %err, "counter store unavailable, admitting call");
}

fn default_bucket_prefix() -> String {
    "tb".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum burst size (tokens).
    pub capacity: f64,
    /// Tokens added per millisecond.
    pub refill_rate_per_ms: f64,
    #[serde(default = "default_bucket_prefix")]
    pub prefix: String,
}

impl TokenBucketConfig {
    pub fn new(capacity: f64, refill_rate_per_ms: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_ms,
            prefix: default_bucket_prefix(),
        }
    }

    /// `rps` tokens per second with a burst of `burst`.
    pub fn per_second(rps: f64, burst: f64) -> Self {
        Self::new(burst, rps / 1000.0)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn validate_at(&self, path: &str) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity < 1.0 {
            return Err(Error::config_field(
                format!("{path}.capacity"),
                "must be a finite number >= 1",
            ));
        }
        if !self.refill_rate_per_ms.is_finite() || self.refill_rate_per_ms <= 0.0 {
            return Err(Error::config_field(
                format!("{path}.refill_rate_per_ms"),
                "must be a finite number > 0",
            ));
        }
        Ok(())
    }

    /// Milliseconds for an empty bucket to fill completely.
    pub fn full_refill_ms(&self) -> f64 {
        self.capacity / self.refill_rate_per_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BucketState {
    tokens: f64,
    last_refill_at: u64,
}

impl BucketState {
    fn full(cfg: &TokenBucketConfig, now: u64) -> Self {
        Self {
            tokens: cfg.capacity,
            last_refill_at: now,
        }
    }

    /// Fractional accumulation; tokens are only truncated at admission.
    fn refill(&mut self, cfg: &TokenBucketConfig, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill_at) as f64;
        self.tokens = (self.tokens + elapsed * cfg.refill_rate_per_ms).min(cfg.capacity);
        self.last_refill_at = self.last_refill_at.max(now);
    }
}

const LOCK_STRIPES: usize = 64;

/// Token-bucket (burst) limiter with state in the shared counter store.
///
/// Load-refill-store for one key is serialised through a striped lock, so
/// callers sharing this instance never lose updates. Unrelated keys mostly
/// land on different stripes.
pub struct TokenBucketLimiter {
    cfg: TokenBucketConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    stripes: Vec<Mutex<()>>,
}

impl TokenBucketLimiter {
    pub fn new(
        cfg: TokenBucketConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        cfg.validate_at("token_bucket")?;
        Ok(Self {
            cfg,
            store,
            clock,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.cfg
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.cfg.prefix, key)
    }

    /// Outlives a full refill cycle, so an idle bucket is never dropped
    /// (and silently refilled) before it would be full anyway.
    fn state_ttl(&self) -> Duration {
        // Float-to-int casts saturate; a near-zero refill rate pins at u64::MAX.
        let secs = (self.cfg.full_refill_ms() / 1000.0).ceil() as u64;
        Duration::from_secs(secs.saturating_add(1))
    }

    async fn load(&self, store_key: &str, now: u64) -> Result<BucketState> {
        match self.store.get(store_key).await? {
            Some(raw) => match serde_json::from_str::<BucketState>(&raw) {
                Ok(state) => Ok(state),
                Err(e) => {
                    warn!(key = %store_key, error = %e, "discarding unreadable bucket state");
                    Ok(BucketState::full(&self.cfg, now))
                }
            },
            None => Ok(BucketState::full(&self.cfg, now)),
        }
    }

    async fn take(&self, key: &str, now: u64) -> Result<RateLimitDecision> {
        let store_key = self.store_key(key);
        let mut state = self.load(&store_key, now).await?;
        state.refill(&self.cfg, now);

        let allowed = state.tokens >= 1.0;
        if allowed {
            state.tokens -= 1.0;
        }
        self.store
            .set(&store_key, &serde_json::to_string(&state)?, self.state_ttl())
            .await?;

        let reset_at = if state.tokens >= 1.0 {
            now
        } else {
            now.saturating_add(((1.0 - state.tokens) / self.cfg.refill_rate_per_ms).ceil() as u64)
        };
        Ok(RateLimitDecision {
            allowed,
            remaining: state.tokens.floor() as u64,
            reset_at,
            limit: self.cfg.capacity.floor() as u64,
            fail_open: false,
        })
    }

    /// Tokens `key` would have right now, without consuming or persisting.
    pub async fn available_tokens(&self, key: &str) -> Result<f64> {
        let now = self.clock.now_ms();
        let mut state = self.load(&self.store_key(key), now).await?;
        state.refill(&self.cfg, now);
        Ok(state.tokens)
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn check_limit(&self, key: &str) -> RateLimitDecision {
        let _guard = self.stripe(key).lock().await;
        let now = self.clock.now_ms();
        match self.take(key, now).await {
            Ok(decision) => {
                debug!(
                    limiter = "token_bucket",
                    key = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "rate limit checked"
                );
                decision
            }
            Err(e) => {
                log_fail_open(self.name(), key, &e);
                RateLimitDecision::fail_open(self.cfg.capacity.floor() as u64, now)
            }
        }
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;

    fn limiter(capacity: f64, rate: f64) -> (Arc<ManualClock>, Arc<MemoryCounterStore>, TokenBucketLimiter) {
        let clock = Arc::new(ManualClock::new(50_000));
        let store = Arc::new(MemoryCounterStore::new(clock.clone()));
        let limiter =
            TokenBucketLimiter::new(TokenBucketConfig::new(capacity, rate), store.clone(), clock.clone())
                .unwrap();
        (clock, store, limiter)
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenBucketConfig::new(10.0, 0.01).validate_at("r").is_ok());
        assert!(TokenBucketConfig::new(0.5, 0.01).validate_at("r").is_err());
        assert!(TokenBucketConfig::new(10.0, 0.0).validate_at("r").is_err());
        assert!(TokenBucketConfig::new(10.0, f64::NAN).validate_at("r").is_err());
        assert!(TokenBucketConfig::new(f64::INFINITY, 1.0).validate_at("r").is_err());
    }

    #[test]
    fn test_per_second_conversion() {
        let cfg = TokenBucketConfig::per_second(10.0, 20.0);
        assert_eq!(cfg.capacity, 20.0);
        assert!((cfg.refill_rate_per_ms - 0.01).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let (_, _, limiter) = limiter(3.0, 0.001);
        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_limit("user:1").await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }
        let d = limiter.check_limit("user:1").await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!((51_000..=51_001).contains(&d.reset_at), "reset_at = {}", d.reset_at);
        // Other callers have their own bucket.
        assert!(limiter.check_limit("user:2").await.allowed);
    }

    #[tokio::test]
    async fn test_refill_is_fractional_and_capped() {
        let (clock, _, limiter) = limiter(10.0, 0.01);
        for _ in 0..10 {
            assert!(limiter.check_limit("ip:10.0.0.1").await.allowed);
        }
        assert!(limiter.available_tokens("ip:10.0.0.1").await.unwrap() < 1e-9);

        clock.advance_ms(500);
        let tokens = limiter.available_tokens("ip:10.0.0.1").await.unwrap();
        assert!((tokens - 5.0).abs() < 1e-9, "tokens = {tokens}");

        clock.advance_ms(60_000);
        let tokens = limiter.available_tokens("ip:10.0.0.1").await.unwrap();
        assert!((tokens - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slow_refill_accumulates_across_calls() {
        // 1 token per 1000ms, probed every 400ms: integer truncation per call
        // would never refill; fractional accumulation admits on the third probe.
        let (clock, _, limiter) = limiter(1.0, 0.001);
        assert!(limiter.check_limit("k").await.allowed);
        clock.advance_ms(400);
        assert!(!limiter.check_limit("k").await.allowed);
        clock.advance_ms(400);
        assert!(!limiter.check_limit("k").await.allowed);
        clock.advance_ms(400);
        assert!(limiter.check_limit("k").await.allowed);
    }

    #[tokio::test]
    async fn test_state_ttl_outlives_refill_cycle() {
        let (clock, store, limiter) = limiter(10.0, 0.001);
        limiter.check_limit("slow").await;
        let ttl = store.ttl("tb:slow").await.unwrap().unwrap();
        assert!(ttl >= Duration::from_millis(10_000));

        clock.advance_ms(9_999);
        assert!(store.get("tb:slow").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vanishing_refill_rate_saturates() {
        let (_, store, limiter) = limiter(10.0, 1e-300);
        for _ in 0..10 {
            assert!(limiter.check_limit("k").await.allowed);
        }
        let d = limiter.check_limit("k").await;
        assert!(!d.allowed);
        assert!(!d.fail_open);
        assert_eq!(d.reset_at, u64::MAX);
        assert_eq!(store.ttl("tb:k").await.unwrap(), Some(Duration::from_millis(u64::MAX - 50_000)));
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_overdraw() {
        let (_, _, limiter) = limiter(20.0, 0.000_001);
        let limiter = Arc::new(limiter);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut admitted = 0;
                for _ in 0..5 {
                    if l.check_limit("shared").await.allowed {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 20);
    }
}
