//! 弹性模式模块：熔断器、限流器及其组合门面。
//!
//! # Resilience Primitives Module
//!
//! Protects the service and its downstream dependencies (Firebase, email,
//! AI providers, external calendar APIs) from cascading failure and
//! overload, and throttles callers fairly.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-dependency CLOSED / OPEN / HALF_OPEN state machine |
//! | [`rate_limiter`] | [`RateLimiter`] trait and the token-bucket (burst) limiter |
//! | [`fixed_window`] | Epoch-aligned fixed-window counter limiter |
//! | [`sliding_window`] | Weighted two-window counter limiter, no boundary bursts |
//! | [`quota`] | Billing-cycle quota reporting (read-only) |
//! | [`registry`] | Named breakers, injected rather than global |
//! | [`health`] | Aggregated breaker health |
//! | [`facade`] | [`Resilience::guard`], limiter first, then breaker |
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use planner_resilience::clock::SystemClock;
//! use planner_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> planner_resilience::Result<()> {
//! let config = CircuitBreakerConfig::new()
//!     .with_failure_threshold(3)
//!     .with_reset_timeout(Duration::from_secs(30))
//!     .with_success_threshold(2);
//! let breaker = CircuitBreaker::new("googleCalendar", config, Arc::new(SystemClock::new()))?;
//!
//! let events = breaker
//!     .execute(|| async { Ok::<_, std::io::Error>(vec!["standup"]) })
//!     .await;
//! assert!(events.is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Facade
//!
//! ```rust
//! use planner_resilience::clock::{Clock, SystemClock};
//! use planner_resilience::config::ResilienceConfig;
//! use planner_resilience::resilience::Resilience;
//! use planner_resilience::store::{CounterStore, MemoryCounterStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> planner_resilience::Result<()> {
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
//! let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new(clock.clone()));
//! let cfg = ResilienceConfig::from_yaml_str(
//!     "routes:\n  email:\n    strategy: token_bucket\n    capacity: 5\n    refill_rate_per_ms: 0.001\n",
//! )?;
//! let resilience = Resilience::from_config(&cfg, store, clock)?;
//!
//! let outcome = resilience
//!     .guard("email", "user:42", || async { Ok::<_, std::io::Error>("queued") })
//!     .await;
//! assert!(outcome.admitted);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod facade;
pub mod fixed_window;
pub mod health;
pub mod quota;
pub mod rate_limiter;
pub mod registry;
pub mod sliding_window;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitOpen,
    CircuitState,
};
pub use facade::{Resilience, ResilienceOutcome};
pub use fixed_window::{FixedWindowConfig, FixedWindowLimiter};
pub use health::{HealthReport, HealthStatus};
pub use quota::{BillingCycle, QuotaConfig, QuotaLimiter};
pub use rate_limiter::{RateLimitDecision, RateLimiter, TokenBucketConfig, TokenBucketLimiter};
pub use registry::BreakerRegistry;
pub use sliding_window::{SlidingWindowConfig, SlidingWindowLimiter};
