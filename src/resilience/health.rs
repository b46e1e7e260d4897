//! Aggregated breaker health for operators.

use super::circuit_breaker::{CircuitBreakerSnapshot, CircuitState};
use super::registry::BreakerRegistry;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: BTreeMap<String, CircuitBreakerSnapshot>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Names of breakers currently OPEN.
    pub fn open_breakers(&self) -> Vec<&str> {
        self.breakers
            .iter()
            .filter(|(_, s)| s.state == CircuitState::Open)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Degraded iff any breaker is OPEN. HALF_OPEN counts as healthy.
pub fn report(registry: &BreakerRegistry) -> HealthReport {
    let breakers = registry.snapshots();
    let degraded = breakers.values().any(|s| s.state == CircuitState::Open);
    HealthReport {
        status: if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
        breakers,
    }
}
