//! Named circuit breakers for one process.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use crate::clock::Clock;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Owns every breaker by dependency name.
///
/// Construct one at startup and hand `Arc<BreakerRegistry>` to whatever
/// needs it; there is no process-global instance. Breakers live as long as
/// the registry.
pub struct BreakerRegistry {
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
    defaults: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        defaults.validate_at("breaker_defaults")?;
        Ok(Self {
            breakers: RwLock::new(BTreeMap::new()),
            defaults,
            clock,
        })
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Register `name` with an explicit config, replacing any existing breaker.
    pub fn register(&self, name: &str, cfg: CircuitBreakerConfig) -> Result<Arc<CircuitBreaker>> {
        let breaker = Arc::new(CircuitBreaker::new(name, cfg, self.clock())?);
        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), Arc::clone(&breaker));
        debug!(breaker = %name, "circuit breaker registered");
        Ok(breaker)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).cloned()
    }

    /// Existing breaker for `name`, or a new one built from the defaults.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        let clock = self.clock();
        let defaults = &self.defaults;
        Arc::clone(map.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = %name, "circuit breaker created lazily");
            Arc::new(CircuitBreaker::from_validated(name, defaults.clone(), clock))
        }))
    }

    pub fn names(&self) -> Vec<String> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }

    pub fn snapshots(&self) -> BTreeMap<String, CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> = {
            let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        breakers
            .iter()
            .map(|b| (b.name().to_string(), b.snapshot()))
            .collect()
    }

    pub fn reset_all(&self) {
        for name in self.names() {
            if let Some(b) = self.get(&name) {
                b.reset();
            }
        }
    }
}
