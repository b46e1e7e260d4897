//! Startup configuration for breakers and per-route limiters.
//!
//! Loaded once (YAML or JSON) and validated before anything is built:
//!
//! ```yaml
//! breaker_defaults:
//!   failure_threshold: 5
//!   reset_timeout_ms: 30000
//! breakers:
//!   googleCalendar:
//!     failure_threshold: 3
//!     success_threshold: 2
//! routes:
//!   googleCalendar:
//!     strategy: fixed_window
//!     window_ms: 60000
//!     max: 100
//!   login:
//!     strategy: sliding_window
//!     window_ms: 60000
//!     max: 10
//!   export:
//!     strategy: quota
//!     monthly_quota: 50
//! ```

use crate::clock::Clock;
use crate::resilience::fixed_window::{FixedWindowConfig, FixedWindowLimiter};
use crate::resilience::quota::{QuotaConfig, QuotaLimiter};
use crate::resilience::rate_limiter::{RateLimiter, TokenBucketConfig, TokenBucketLimiter};
use crate::resilience::sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
use crate::resilience::{BreakerRegistry, CircuitBreakerConfig};
use crate::store::{CounterStore, MemoryCounterStore};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RESILIENCE_CONFIG";

/// Per-breaker settings; omitted fields inherit `breaker_defaults`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_ms: Option<u64>,
    pub success_threshold: Option<u32>,
    pub monitoring_window_ms: Option<u64>,
}

impl BreakerOverrides {
    pub fn resolve(&self, defaults: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            reset_timeout_ms: self.reset_timeout_ms.unwrap_or(defaults.reset_timeout_ms),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold),
            monitoring_window_ms: self
                .monitoring_window_ms
                .unwrap_or(defaults.monitoring_window_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitPolicy {
    FixedWindow(FixedWindowConfig),
    SlidingWindow(SlidingWindowConfig),
    TokenBucket(TokenBucketConfig),
    Quota(QuotaConfig),
}

impl RateLimitPolicy {
    pub fn validate_at(&self, path: &str) -> Result<()> {
        match self {
            RateLimitPolicy::FixedWindow(c) => c.validate_at(path),
            RateLimitPolicy::SlidingWindow(c) => c.validate_at(path),
            RateLimitPolicy::TokenBucket(c) => c.validate_at(path),
            RateLimitPolicy::Quota(c) => c.validate_at(path),
        }
    }

    /// Build the limiter for `route`. Store keys are namespaced by route so
    /// two routes with the same strategy never share counters.
    pub fn build(
        &self,
        route: &str,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn RateLimiter>> {
        self.validate_at(&format!("routes.{route}"))?;
        let limiter: Arc<dyn RateLimiter> = match self {
            RateLimitPolicy::FixedWindow(c) => {
                let cfg = c.clone().with_prefix(format!("{}:{}", c.prefix, route));
                Arc::new(FixedWindowLimiter::new(cfg, store, clock)?)
            }
            RateLimitPolicy::SlidingWindow(c) => {
                let cfg = c.clone().with_prefix(format!("{}:{}", c.prefix, route));
                Arc::new(SlidingWindowLimiter::new(cfg, store, clock)?)
            }
            RateLimitPolicy::TokenBucket(c) => {
                let cfg = c.clone().with_prefix(format!("{}:{}", c.prefix, route));
                Arc::new(TokenBucketLimiter::new(cfg, store, clock)?)
            }
            RateLimitPolicy::Quota(c) => {
                let cfg = c.clone().with_prefix(format!("{}:{}", c.prefix, route));
                Arc::new(QuotaLimiter::new(cfg, store, clock)?)
            }
        };
        Ok(limiter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entry cap for the in-process store.
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

impl StoreConfig {
    pub fn build_memory(&self, clock: Arc<dyn Clock>) -> MemoryCounterStore {
        MemoryCounterStore::with_capacity(clock, self.max_entries)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub breaker_defaults: CircuitBreakerConfig,
    pub breakers: BTreeMap<String, BreakerOverrides>,
    pub routes: BTreeMap<String, RateLimitPolicy>,
    pub store: StoreConfig,
}

impl ResilienceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from disk; `.json` files are parsed as JSON, everything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config: {e}"),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config"),
            )
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let cfg = if is_json {
            Self::from_json_str(&raw)?
        } else {
            Self::from_yaml_str(&raw)?
        };
        info!(
            path = %path.display(),
            breakers = cfg.breakers.len(),
            routes = cfg.routes.len(),
            "resilience config loaded"
        );
        Ok(cfg)
    }

    /// Load from the file named by `RESILIENCE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.breaker_defaults.validate_at("breaker_defaults")?;
        for (name, overrides) in &self.breakers {
            overrides
                .resolve(&self.breaker_defaults)
                .validate_at(&format!("breakers.{name}"))?;
        }
        for (route, policy) in &self.routes {
            policy.validate_at(&format!("routes.{route}"))?;
        }
        if self.store.max_entries == 0 {
            return Err(Error::config_field("store.max_entries", "must be greater than zero"));
        }
        Ok(())
    }

    /// Effective config for `name`, falling back to the defaults.
    pub fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(name)
            .map(|o| o.resolve(&self.breaker_defaults))
            .unwrap_or_else(|| self.breaker_defaults.clone())
    }

    /// Registry with every configured breaker pre-registered.
    pub fn build_registry(&self, clock: Arc<dyn Clock>) -> Result<BreakerRegistry> {
        let registry = BreakerRegistry::new(self.breaker_defaults.clone(), clock)?;
        for name in self.breakers.keys() {
            registry.register(name, self.breaker_config(name))?;
        }
        Ok(registry)
    }
}
