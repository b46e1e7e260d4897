//! Fixed-window counter limiter.

use super::rate_limiter::{log_fail_open, RateLimitDecision, RateLimiter};
use crate::clock::Clock;
use crate::store::CounterStore;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

fn default_window_prefix() -> String {
    "rl".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    pub window_ms: u64,
    pub max: u64,
    #[serde(default = "default_window_prefix")]
    pub prefix: String,
}

impl FixedWindowConfig {
    pub fn new(window_ms: u64, max: u64) -> Self {
        Self {
            window_ms,
            max,
            prefix: default_window_prefix(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn validate_at(&self, path: &str) -> Result<()> {
        if self.window_ms == 0 {
            return Err(Error::config_field(
                format!("{path}.window_ms"),
                "must be greater than zero",
            ));
        }
        if self.max == 0 {
            return Err(Error::config_field(
                format!("{path}.max"),
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Counter TTL: the window length rounded up to whole seconds.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.window_ms.div_ceil(1000))
    }
}

/// Counts calls per `floor(now / window_ms)` bucket.
///
/// Windows are aligned to the epoch and do not carry over, so up to
/// `2 * max` calls can pass across a boundary.
pub struct FixedWindowLimiter {
    cfg: FixedWindowConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(
        cfg: FixedWindowConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        cfg.validate_at("fixed_window")?;
        Ok(Self { cfg, store, clock })
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.cfg
    }

    /// Store key for `key` in the window containing `now_ms`.
    pub fn window_key(&self, key: &str, now_ms: u64) -> String {
        format!("{}:{}:{}", self.cfg.prefix, key, now_ms / self.cfg.window_ms)
    }

    async fn count(&self, key: &str, now: u64) -> Result<RateLimitDecision> {
        let bucket = now / self.cfg.window_ms;
        let store_key = self.window_key(key, now);

        let count = self.store.increment(&store_key).await?;
        if count == 1 {
            // Only the creating increment sets the TTL; later ones must not extend it.
            self.store.expire(&store_key, self.cfg.ttl()).await?;
        }

        let count = count.max(0) as u64;
        Ok(RateLimitDecision {
            allowed: count <= self.cfg.max,
            remaining: self.cfg.max.saturating_sub(count),
            reset_at: (bucket + 1).saturating_mul(self.cfg.window_ms),
            limit: self.cfg.max,
            fail_open: false,
        })
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check_limit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        match self.count(key, now).await {
            Ok(decision) => {
                debug!(
                    limiter = "fixed_window",
                    key = %key,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "rate limit checked"
                );
                decision
            }
            Err(e) => {
                log_fail_open(self.name(), key, &e);
                RateLimitDecision::fail_open(self.cfg.max, now)
            }
        }
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;

    fn limiter(window_ms: u64, max: u64) -> (Arc<ManualClock>, Arc<MemoryCounterStore>, FixedWindowLimiter) {
        let clock = Arc::new(ManualClock::new(173_000_000));
        let store = Arc::new(MemoryCounterStore::new(clock.clone()));
        let limiter =
            FixedWindowLimiter::new(FixedWindowConfig::new(window_ms, max), store.clone(), clock.clone())
                .unwrap();
        (clock, store, limiter)
    }

    #[test]
    fn test_config_validation_and_ttl() {
        assert!(FixedWindowConfig::new(0, 5).validate_at("routes.x").is_err());
        assert!(FixedWindowConfig::new(1000, 0).validate_at("routes.x").is_err());
        assert_eq!(FixedWindowConfig::new(1000, 5).ttl(), Duration::from_secs(1));
        assert_eq!(FixedWindowConfig::new(1500, 5).ttl(), Duration::from_secs(2));
        assert_eq!(FixedWindowConfig::new(1, 5).ttl(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_max_per_window_then_rollover() {
        let (clock, _, limiter) = limiter(1000, 5);
        for i in 0..5 {
            let d = limiter.check_limit("user:42").await;
            assert!(d.allowed);
            assert_eq!(d.remaining, 4 - i);
        }
        let d = limiter.check_limit("user:42").await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_at, 173_001_000);

        clock.advance_ms(1_000);
        let d = limiter.check_limit("user:42").await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[tokio::test]
    async fn test_ttl_set_once_per_window() {
        let (clock, store, limiter) = limiter(10_000, 100);
        limiter.check_limit("user:7").await;
        let key = limiter.window_key("user:7", clock.now_ms());
        assert_eq!(key, "rl:user:7:17300");
        assert_eq!(store.ttl(&key).await.unwrap(), Some(Duration::from_secs(10)));

        clock.advance_ms(4_000);
        limiter.check_limit("user:7").await;
        assert_eq!(store.ttl(&key).await.unwrap(), Some(Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn test_reset_at_saturates_at_end_of_time() {
        let (clock, _, limiter) = limiter(1000, 5);
        clock.set(u64::MAX - 5);
        let d = limiter.check_limit("user:42").await;
        assert!(d.allowed);
        assert!(!d.fail_open);
        assert_eq!(d.reset_at, u64::MAX);
    }

    #[tokio::test]
    async fn test_boundary_burst_is_allowed() {
        let (clock, _, limiter) = limiter(1000, 3);
        clock.set(173_000_999);
        for _ in 0..3 {
            assert!(limiter.check_limit("ip:1").await.allowed);
        }
        clock.advance_ms(1);
        for _ in 0..3 {
            assert!(limiter.check_limit("ip:1").await.allowed);
        }
        assert!(!limiter.check_limit("ip:1").await.allowed);
    }
}
