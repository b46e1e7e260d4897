use super::circuit_breaker::CircuitState;
use super::health::{self, HealthReport};
use super::rate_limiter::RateLimiter;
use super::registry::BreakerRegistry;
use crate::clock::Clock;
use crate::config::ResilienceConfig;
use crate::error::GuardError;
use crate::store::CounterStore;
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Everything `guard` learned about one call.
#[derive(Debug)]
pub struct ResilienceOutcome<T, E> {
    /// The operation was actually invoked.
    pub admitted: bool,
    pub result: std::result::Result<T, GuardError<E>>,
    /// Breaker state after the call settled.
    pub breaker_state: CircuitState,
    /// `None` when no limiter applies to the route.
    pub rate_limit_remaining: Option<u64>,
}

impl<T, E> ResilienceOutcome<T, E> {
    pub fn into_result(self) -> std::result::Result<T, GuardError<E>> {
        self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Rate limiter + circuit breaker in front of outbound dependency calls.
///
/// The caller-scoped limiter runs first, so abusive callers are turned away
/// without consuming a breaker probe, and rejections never count as
/// dependency failures.
pub struct Resilience {
    registry: Arc<BreakerRegistry>,
    limiters: HashMap<String, Arc<dyn RateLimiter>>,
}

impl Resilience {
    pub fn new(registry: Arc<BreakerRegistry>) -> Self {
        Self {
            registry,
            limiters: HashMap::new(),
        }
    }

    /// Attach `limiter` to calls routed through `route`.
    pub fn with_limiter(mut self, route: impl Into<String>, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiters.insert(route.into(), limiter);
        self
    }

    /// Build breakers and limiters from validated startup config.
    pub fn from_config(
        cfg: &ResilienceConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        cfg.validate()?;
        let registry = Arc::new(cfg.build_registry(Arc::clone(&clock))?);
        let mut facade = Self::new(registry);
        for (route, policy) in &cfg.routes {
            let limiter = policy.build(route, Arc::clone(&store), Arc::clone(&clock))?;
            facade.limiters.insert(route.clone(), limiter);
        }
        Ok(facade)
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    pub fn limiter(&self, route: &str) -> Option<&Arc<dyn RateLimiter>> {
        self.limiters.get(route)
    }

    pub fn health(&self) -> HealthReport {
        health::report(&self.registry)
    }

    /// Guard a call to `dependency`, rate limited under the route of the same name.
    pub async fn guard<F, Fut, T, E>(
        &self,
        dependency: &str,
        caller_key: &str,
        operation: F,
    ) -> ResilienceOutcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.guard_route(dependency, dependency, caller_key, operation)
            .await
    }

    /// Guard a call to `dependency`, rate limited under `route`.
    pub async fn guard_route<F, Fut, T, E>(
        &self,
        route: &str,
        dependency: &str,
        caller_key: &str,
        operation: F,
    ) -> ResilienceOutcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let breaker = self.registry.get_or_create(dependency);

        let mut remaining = None;
        if let Some(limiter) = self.limiters.get(route) {
            let decision = limiter.check_limit(caller_key).await;
            remaining = Some(decision.remaining);
            if !decision.allowed {
                debug!(route = %route, key = %caller_key, "call rejected by rate limiter");
                return ResilienceOutcome {
                    admitted: false,
                    result: Err(GuardError::RateLimitExceeded {
                        key: caller_key.to_string(),
                        remaining: decision.remaining,
                        reset_at: decision.reset_at,
                    }),
                    breaker_state: breaker.state(),
                    rate_limit_remaining: remaining,
                };
            }
        }

        let result = breaker.execute(operation).await;
        let admitted = !matches!(result, Err(ref e) if e.is_circuit_open());
        ResilienceOutcome {
            admitted,
            result: result.map_err(GuardError::from),
            breaker_state: breaker.state(),
            rate_limit_remaining: remaining,
        }
    }
}
