//! # planner-resilience
//!
//! 规划器后端的弹性层：为外部依赖提供熔断与限流保护。
//!
//! Resilience layer for the planner backend: per-dependency circuit
//! breakers and caller-keyed rate limiters guarding outbound calls to
//! Firebase, email, AI providers and external calendar APIs.
//!
//! ## Overview
//!
//! An inbound operation first passes the caller's rate limiter (rejected
//! immediately when over budget), then the target dependency's circuit
//! breaker (rejected immediately when OPEN). Only then does the wrapped
//! operation run, and its outcome drives the breaker's state machine.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`clock`] | Millisecond time source, real and manual |
//! | [`store`] | Shared counter store used by the limiters |
//! | [`resilience`] | Breakers, limiters, registry, health and the [`Resilience`] facade |
//! | [`config`] | YAML/JSON startup configuration |
//! | `http` | `GET /health` router (feature `http`) |
//!
//! ## Failure policy
//!
//! - Breaker and limiter rejections surface as typed errors
//!   ([`BreakerError`], [`GuardError`]); nothing here retries.
//! - Breaker state is in-process. Only limiter state lives in the counter
//!   store, and an unreachable store admits calls (fail open) with a warning.

pub mod clock;
pub mod config;
pub mod resilience;
pub mod store;

#[cfg(feature = "http")]
pub mod http;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ResilienceConfig;
pub use resilience::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitDecision,
    RateLimiter, Resilience, ResilienceOutcome,
};
pub use store::{CounterStore, MemoryCounterStore};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

pub mod error;
pub use error::{BreakerError, Error, ErrorContext, GuardError};
