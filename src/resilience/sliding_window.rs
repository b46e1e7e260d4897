//! Sliding-window counter limiter.
//!
//! Approximates a true sliding log with two fixed-window counters: the
//! previous window's count is weighted by how much of it still overlaps the
//! sliding window ending now.
//!
//! ```text
//! estimate = previous * (1 - elapsed_in_current / window) + current
//! ```
//!
//! Unlike [`FixedWindowLimiter`](super::fixed_window::FixedWindowLimiter)
//! there is no `2 * max` burst across a boundary.

use super::rate_limiter::{log_fail_open, RateLimitDecision, RateLimiter};
use crate::clock::Clock;
use crate::store::CounterStore;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

fn default_sliding_prefix() -> String {
    "sw".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    pub window_ms: u64,
    pub max: u64,
    #[serde(default = "default_sliding_prefix")]
    pub prefix: String,
}

impl SlidingWindowConfig {
    pub fn new(window_ms: u64, max: u64) -> Self {
        Self {
            window_ms,
            max,
            prefix: default_sliding_prefix(),
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

    /// A counter is read as "previous" for one more window after its own,
    /// so it lives for two windows, rounded up to whole seconds.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.window_ms.saturating_mul(2).div_ceil(1000))
    }
}

pub struct SlidingWindowLimiter {
    cfg: SlidingWindowConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(
        cfg: SlidingWindowConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        cfg.validate_at("sliding_window")?;
        Ok(Self { cfg, store, clock })
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.cfg
    }

    fn bucket_key(&self, key: &str, bucket: u64) -> String {
        format!("{}:{}:{}", self.cfg.prefix, key, bucket)
    }

    async fn previous_count(&self, key: &str, bucket: u64) -> Result<u64> {
        let Some(prev) = bucket.checked_sub(1) else {
            return Ok(0);
        };
        let store_key = self.bucket_key(key, prev);
        match self.store.get(&store_key).await? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(n) => Ok(n.max(0) as u64),
                Err(_) => {
                    warn!(key = %store_key, value = %raw, "ignoring non-numeric window counter");
                    Ok(0)
                }
            },
            None => Ok(0),
        }
    }

    async fn count(&self, key: &str, now: u64) -> Result<RateLimitDecision> {
        let window = self.cfg.window_ms;
        let bucket = now / window;
        let start = bucket * window;
        let current_key = self.bucket_key(key, bucket);

        let current = self.store.increment(&current_key).await?;
        if current == 1 {
            self.store.expire(&current_key, self.cfg.ttl()).await?;
        }
        let current = current.max(0) as u64;
        let previous = self.previous_count(key, bucket).await?;

        let elapsed = (now - start) as f64 / window as f64;
        let estimate = previous as f64 * (1.0 - elapsed) + current as f64;
        let max = self.cfg.max as f64;
        let remaining = (max - estimate).floor().max(0.0) as u64;

        Ok(RateLimitDecision {
            allowed: estimate <= max,
            remaining,
            reset_at: self.next_admission(now, start, previous, current, remaining),
            limit: self.cfg.max,
            fail_open: false,
        })
    }

    /// Earliest time one more call would be admitted if nobody else calls.
    fn next_admission(&self, now: u64, start: u64, previous: u64, current: u64, remaining: u64) -> u64 {
        if remaining >= 1 {
            return now;
        }
        let window = self.cfg.window_ms as f64;
        let max = self.cfg.max;
        let at = if current < max && previous > 0 {
            // Wait for the previous window's weight to decay.
            let room = (max - current - 1) as f64;
            let offset = (window * (1.0 - room / previous as f64)).ceil() as u64;
            start.saturating_add(offset)
        } else {
            // This window's own count has to decay once the next one starts.
            let room = max.saturating_sub(1) as f64;
            let offset = (window * (1.0 - room / current.max(1) as f64)).ceil() as u64;
            start
                .saturating_add(self.cfg.window_ms)
                .saturating_add(offset)
        };
        at.max(now)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check_limit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        match self.count(key, now).await {
            Ok(decision) => {
                debug!(
                    limiter = "sliding_window",
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
        "sliding_window"
    }
}
