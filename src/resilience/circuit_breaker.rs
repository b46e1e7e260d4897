use crate::clock::Clock;
use crate::error::BreakerError;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while CLOSED) that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays OPEN before admitting a probe.
    pub reset_timeout_ms: u64,
    /// Successful probes required in HALF_OPEN before closing.
    pub success_threshold: u32,
    /// A failure arriving later than this after the previous one starts a new streak.
    pub monitoring_window_ms: u64,
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 1,
            monitoring_window_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window_ms = duration_ms(window);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_at("circuit_breaker")
    }

    /// Validate, reporting failures under `path` (e.g. `breakers.email`).
    pub fn validate_at(&self, path: &str) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::config_field(
                format!("{path}.failure_threshold"),
                "must be greater than zero",
            ));
        }
        if self.reset_timeout_ms == 0 {
            return Err(Error::config_field(
                format!("{path}.reset_timeout_ms"),
                "must be greater than zero",
            ));
        }
        if self.success_threshold == 0 {
            return Err(Error::config_field(
                format!("{path}.success_threshold"),
                "must be greater than zero",
            ));
        }
        if self.monitoring_window_ms == 0 {
            return Err(Error::config_field(
                format!("{path}.monitoring_window_ms"),
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Read-only view of a breaker, serialized for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    #[serde(rename = "nextAttempt")]
    pub next_attempt_at: Option<u64>,
    #[serde(rename = "lastFailure")]
    pub last_failure_at: Option<u64>,
    pub probe_in_flight: bool,
}

/// Rejection returned by [`CircuitBreaker::allow`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency '{name}' unavailable: circuit {state}")]
pub struct CircuitOpen {
    pub name: String,
    pub state: CircuitState,
    pub next_attempt_at: Option<u64>,
}

impl<E> From<CircuitOpen> for BreakerError<E> {
    fn from(open: CircuitOpen) -> Self {
        BreakerError::CircuitOpen {
            name: open.name,
            state: open.state,
            next_attempt_at: open.next_attempt_at,
        }
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    next_attempt_at: Option<u64>,
    last_failure_at: Option<u64>,
    probe_in_flight: bool,
    /// Bumped on every transition and reset; outcomes from older epochs are dropped.
    epoch: u64,
}

impl State {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            next_attempt_at: None,
            last_failure_at: None,
            probe_in_flight: false,
            epoch: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Abandoned,
}

/// Per-dependency circuit breaker.
///
/// All admission decisions and transitions happen under one mutex that is
/// never held across an `.await`, so checking `next_attempt_at` and moving
/// OPEN -> HALF_OPEN is a single step and only one probe is ever in flight.
pub struct CircuitBreaker {
    name: String,
    cfg: ArcSwap<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &*self.cfg.load())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        cfg: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        cfg.validate_at(&format!("breakers.{name}"))?;
        Ok(Self::from_validated(name, cfg, clock))
    }

    pub(crate) fn from_validated(
        name: impl Into<String>,
        cfg: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            cfg: ArcSwap::from_pointee(cfg),
            clock,
            state: Mutex::new(State::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.cfg.load_full()
    }

    /// Replace the thresholds. Current state and counters are kept.
    pub fn reconfigure(&self, cfg: CircuitBreakerConfig) -> Result<()> {
        cfg.validate_at(&format!("breakers.{}", self.name))?;
        info!(breaker = %self.name, ?cfg, "circuit breaker reconfigured");
        self.cfg.store(Arc::new(cfg));
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere while holding the lock does not invalidate it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `operation` under breaker protection.
    ///
    /// Rejections never invoke the operation and are not counted as failures.
    /// If the returned future is dropped before the operation finishes, the
    /// call is recorded as a failure.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> std::result::Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = self.allow().map_err(BreakerError::from)?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result.map_err(BreakerError::OperationFailed)
    }

    /// Like [`execute`](Self::execute), but the operation runs on its own
    /// task, so the breaker still observes the real outcome if the caller
    /// stops waiting. The outer error reports a task that never finished.
    pub async fn execute_detached<F, Fut, T, E>(
        self: &Arc<Self>,
        operation: F,
    ) -> Result<std::result::Result<T, BreakerError<E>>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let breaker = Arc::clone(self);
        let handle = tokio::spawn(async move { breaker.execute(operation).await });
        match handle.await {
            Ok(outcome) => Ok(outcome),
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(join) => Err(Error::runtime_with_context(
                format!("guarded task did not complete: {join}"),
                crate::ErrorContext::new().with_source(self.name.clone()),
            )),
        }
    }

    /// Admit one call, or reject it without side effects on counters.
    ///
    /// The returned permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]; dropping it unsettled counts as a failure.
    pub fn allow(&self) -> std::result::Result<CallPermit<'_>, CircuitOpen> {
        let now = self.clock.now_ms();
        let mut st = self.lock();
        let probe = match st.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let due = st.next_attempt_at.map(|at| now >= at).unwrap_or(true);
                if !due {
                    debug!(breaker = %self.name, "call rejected: circuit open");
                    return Err(self.rejection(&st));
                }
                st.state = CircuitState::HalfOpen;
                st.half_open_successes = 0;
                st.probe_in_flight = true;
                st.epoch += 1;
                info!(breaker = %self.name, "circuit half-open, admitting probe");
                true
            }
            CircuitState::HalfOpen => {
                if st.probe_in_flight {
                    debug!(breaker = %self.name, "call rejected: probe already in flight");
                    return Err(self.rejection(&st));
                }
                st.probe_in_flight = true;
                true
            }
        };
        Ok(CallPermit {
            breaker: self,
            epoch: st.epoch,
            probe,
            settled: false,
        })
    }

    fn rejection(&self, st: &State) -> CircuitOpen {
        CircuitOpen {
            name: self.name.clone(),
            state: st.state,
            next_attempt_at: st.next_attempt_at,
        }
    }

    fn settle(&self, epoch: u64, probe: bool, outcome: Outcome) {
        let now = self.clock.now_ms();
        let cfg = self.cfg.load();
        let mut st = self.lock();

        let failed = !matches!(outcome, Outcome::Success);
        let previous_failure = st.last_failure_at;
        if failed {
            st.last_failure_at = Some(now);
        }

        if epoch != st.epoch {
            debug!(breaker = %self.name, ?outcome, "stale outcome ignored");
            return;
        }
        if probe {
            st.probe_in_flight = false;
        }

        match (st.state, failed) {
            (CircuitState::Closed, false) => {
                st.consecutive_failures = 0;
            }
            (CircuitState::Closed, true) => {
                let streak_expired = previous_failure
                    .map(|at| now.saturating_sub(at) > cfg.monitoring_window_ms)
                    .unwrap_or(false);
                if streak_expired {
                    st.consecutive_failures = 0;
                }
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                if st.consecutive_failures >= cfg.failure_threshold {
                    self.trip(&mut st, now, cfg.reset_timeout_ms);
                }
            }
            (CircuitState::HalfOpen, false) => {
                st.half_open_successes = st.half_open_successes.saturating_add(1);
                if st.half_open_successes >= cfg.success_threshold {
                    st.state = CircuitState::Closed;
                    st.consecutive_failures = 0;
                    st.half_open_successes = 0;
                    st.next_attempt_at = None;
                    st.epoch += 1;
                    info!(breaker = %self.name, "circuit closed after successful probes");
                }
            }
            (CircuitState::HalfOpen, true) => {
                if matches!(outcome, Outcome::Abandoned) {
                    debug!(breaker = %self.name, "probe abandoned before completion");
                }
                self.trip(&mut st, now, cfg.reset_timeout_ms);
            }
            (CircuitState::Open, _) => {}
        }
    }

    fn trip(&self, st: &mut State, now: u64, reset_timeout_ms: u64) {
        let from = st.state;
        let next_attempt_at = now.saturating_add(reset_timeout_ms);
        st.state = CircuitState::Open;
        st.half_open_successes = 0;
        st.probe_in_flight = false;
        st.next_attempt_at = Some(next_attempt_at);
        st.epoch += 1;
        warn!(
            breaker = %self.name,
            from = %from,
            consecutive_failures = st.consecutive_failures,
            next_attempt_at,
            "circuit opened"
        );
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        CircuitBreakerSnapshot {
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            half_open_successes: st.half_open_successes,
            next_attempt_at: st.next_attempt_at,
            last_failure_at: st.last_failure_at,
            probe_in_flight: st.probe_in_flight,
        }
    }

    /// Force CLOSED and zero all counters. Outstanding permits become stale.
    pub fn reset(&self) {
        let mut st = self.lock();
        let epoch = st.epoch + 1;
        let last_failure_at = st.last_failure_at;
        *st = State::closed();
        st.epoch = epoch;
        st.last_failure_at = last_failure_at;
        info!(breaker = %self.name, "circuit reset");
    }
}

/// Admission ticket for one guarded call.
#[must_use = "an unsettled permit is recorded as a failure when dropped"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the HALF_OPEN probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.epoch, self.probe, Outcome::Success);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.epoch, self.probe, Outcome::Failure);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.epoch, self.probe, Outcome::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(cfg: CircuitBreakerConfig) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cb = CircuitBreaker::new("googleCalendar", cfg, clock.clone()).unwrap();
        (clock, cb)
    }

    async fn fail(cb: &CircuitBreaker) -> std::result::Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("upstream 503") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> std::result::Result<u32, BreakerError<&'static str>> {
        cb.execute(|| async { Ok::<_, &'static str>(7) }).await
    }

    #[test]
    fn test_config_defaults() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.reset_timeout_ms, 30_000);
        assert_eq!(cfg.success_threshold, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_values() {
        let cfg = CircuitBreakerConfig::new().with_failure_threshold(0);
        let err = cfg.validate_at("breakers.email").unwrap_err();
        assert!(err.to_string().contains("breakers.email.failure_threshold"));

        assert!(CircuitBreakerConfig::new()
            .with_reset_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CircuitBreakerConfig::new()
            .with_success_threshold(0)
            .validate()
            .is_err());

        let clock = Arc::new(ManualClock::new(0));
        assert!(CircuitBreaker::new("x", CircuitBreakerConfig::new().with_failure_threshold(0), clock).is_err());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_without_invoking() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(3));
        for _ in 0..2 {
            assert!(matches!(fail(&cb).await, Err(BreakerError::OperationFailed("upstream 503"))));
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let res = cb
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;
        assert!(matches!(res, Err(BreakerError::CircuitOpen { state: CircuitState::Open, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(3));
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        fail(&cb).await.ok();
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_rejections_do_not_extend_deadline() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(1_000)),
        );
        fail(&cb).await.ok();
        let deadline = cb.snapshot().next_attempt_at.unwrap();
        assert_eq!(deadline, 1_001_000);

        clock.advance_ms(500);
        assert!(succeed(&cb).await.unwrap_err().is_circuit_open());
        assert_eq!(cb.snapshot().next_attempt_at, Some(deadline));
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_deadline() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(3)
                .with_reset_timeout(Duration::from_millis(1_000)),
        );
        fail(&cb).await.ok();
        clock.advance_ms(1_000);
        succeed(&cb).await.unwrap();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_successes, 2);

        clock.advance_ms(20);
        fail(&cb).await.ok();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.half_open_successes, 0);
        assert_eq!(snap.next_attempt_at, Some(clock.now_ms() + 1_000));
    }

    #[tokio::test]
    async fn test_only_one_probe_in_flight() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(100)),
        );
        fail(&cb).await.ok();
        clock.advance_ms(100);

        let probe = cb.allow().expect("first caller becomes the probe");
        assert!(probe.is_probe());
        let second = cb.allow();
        assert!(matches!(second, Err(CircuitOpen { state: CircuitState::HalfOpen, .. })));
        assert!(cb.snapshot().probe_in_flight);

        probe.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_probe_counts_as_failure() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(100)),
        );
        fail(&cb).await.ok();
        clock.advance_ms(100);

        {
            let _probe = cb.allow().unwrap();
        }
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(!snap.probe_in_flight);
    }

    #[tokio::test]
    async fn test_cancelled_execute_is_recorded() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));
        let pending = cb.execute(|| futures::future::pending::<std::result::Result<(), &str>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(5), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));
        fail(&cb).await.ok();
        for _ in 0..2 {
            cb.reset();
            let snap = cb.snapshot();
            assert_eq!(snap.state, CircuitState::Closed);
            assert_eq!(snap.consecutive_failures, 0);
            assert_eq!(snap.half_open_successes, 0);
            assert_eq!(snap.next_attempt_at, None);
        }
    }

    #[tokio::test]
    async fn test_stale_permit_after_reset_is_ignored() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));
        let permit = cb.allow().unwrap();
        cb.reset();
        permit.failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert!(cb.snapshot().last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_closed_permit_settling_after_trip_is_ignored() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_secs(30)),
        );
        let slow_failure = cb.allow().unwrap();
        let slow_success = cb.allow().unwrap();
        assert!(!slow_failure.is_probe());

        fail(&cb).await.ok();
        let tripped = cb.snapshot();
        assert_eq!(tripped.state, CircuitState::Open);
        assert_eq!(tripped.next_attempt_at, Some(1_030_000));

        clock.advance(Duration::from_secs(10));
        slow_failure.failure();
        slow_success.success();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt_at, tripped.next_attempt_at);
        assert_eq!(snap.consecutive_failures, tripped.consecutive_failures);
        assert_eq!(snap.last_failure_at, Some(1_010_000));
    }

    #[tokio::test]
    async fn test_huge_reset_timeout_saturates_deadline() {
        let (clock, cb) = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: u64::MAX,
            ..CircuitBreakerConfig::default()
        });
        fail(&cb).await.ok();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt_at, Some(u64::MAX));

        clock.advance(Duration::from_secs(86_400));
        assert!(matches!(succeed(&cb).await, Err(BreakerError::CircuitOpen { .. })));
    }

    #[test]
    fn test_builder_saturates_oversized_durations() {
        let cfg = CircuitBreakerConfig::new()
            .with_reset_timeout(Duration::MAX)
            .with_monitoring_window(Duration::MAX);
        assert_eq!(cfg.reset_timeout_ms, u64::MAX);
        assert_eq!(cfg.monitoring_window_ms, u64::MAX);
        assert!(cfg.validate().is_ok());
    }

    #[tokio::test]
    async fn test_monitoring_window_restarts_streak() {
        let (clock, cb) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_monitoring_window(Duration::from_secs(10)),
        );
        fail(&cb).await.ok();
        clock.advance(Duration::from_secs(11));
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
        clock.advance(Duration::from_secs(1));
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reconfigure_keeps_state() {
        let (_, cb) = breaker(CircuitBreakerConfig::new().with_failure_threshold(5));
        fail(&cb).await.ok();
        assert!(cb.reconfigure(CircuitBreakerConfig::new().with_failure_threshold(0)).is_err());
        cb.reconfigure(CircuitBreakerConfig::new().with_failure_threshold(2)).unwrap();
        assert_eq!(cb.config().failure_threshold, 2);
        fail(&cb).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_execute_detached_reports_outcome() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = Arc::new(
            CircuitBreaker::new("email", CircuitBreakerConfig::new().with_failure_threshold(1), clock)
                .unwrap(),
        );
        let out = cb
            .execute_detached(|| async { Err::<(), _>("smtp down".to_string()) })
            .await
            .unwrap();
        assert!(matches!(out, Err(BreakerError::OperationFailed(ref m)) if m == "smtp down"));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let (_, cb) = breaker(CircuitBreakerConfig::default());
        let json = serde_json::to_value(cb.snapshot()).unwrap();
        assert_eq!(json["state"], "CLOSED");
        assert_eq!(json["consecutiveFailures"], 0);
        assert_eq!(json["halfOpenSuccesses"], 0);
        assert!(json["nextAttempt"].is_null());
        assert!(json["lastFailure"].is_null());
    }
}
