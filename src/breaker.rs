//! Per-target circuit breaker (§4.10): `closed → open → half_open → closed`.
//! State lives behind a per-entry `Mutex` in a `DashMap`, so transitions are
//! atomic without a single-writer mailbox — a concurrent-map alternative
//! that an explicit design note (§9) permits for this component.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{info, warn};

use crate::error::SnmpError;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub half_open_max_calls: u32,
    pub success_threshold_to_close: u32,
}

impl Default for BreakerParams {
    fn default() -> Self {
        BreakerParams {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 3,
            success_threshold_to_close: 3,
        }
    }
}

/// §3's `BreakerState`. Phase transitions are the only way these counts
/// reset.
#[derive(Debug, Clone)]
pub struct BreakerState {
    pub phase: Phase,
    pub fail_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub last_failure_reason: Option<String>,
    pub half_open_calls: u32,
    pub created_at: Instant,
}

impl BreakerState {
    fn new() -> Self {
        BreakerState {
            phase: Phase::Closed,
            fail_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_failure_reason: None,
            half_open_calls: 0,
            created_at: Instant::now(),
        }
    }
}

/// A permission the breaker granted to proceed; callers must report the
/// outcome back via `on_success`/`on_failure` so the state machine advances.
pub struct Admission {
    target: Target,
}

pub struct CircuitBreaker {
    params: BreakerParams,
    states: DashMap<Target, std::sync::Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(params: BreakerParams) -> Self {
        CircuitBreaker { params, states: DashMap::new() }
    }

    fn ensure_entry(&self, target: &Target) {
        self.states.entry(target.clone()).or_insert_with(|| std::sync::Mutex::new(BreakerState::new()));
    }

    /// Requests permission to call `target`. `Open` rejects immediately
    /// without touching the wire (§8 testable property 8); `half_open`
    /// admits up to `half_open_max_calls` probes; `closed` always admits.
    pub fn try_admit(&self, target: &Target) -> Result<Admission, SnmpError> {
        self.ensure_entry(target);
        let guard = self.states.get(target).unwrap();
        let mut state = guard.lock().unwrap();

        match state.phase {
            Phase::Closed => Ok(Admission { target: target.clone() }),
            Phase::Open => {
                let elapsed = state.last_failure_time.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_millis(self.params.recovery_timeout_ms) {
                    state.phase = Phase::HalfOpen;
                    state.half_open_calls = 0;
                    info!("breaker: {} open → half_open after {:?}", target, elapsed);
                    state.half_open_calls += 1;
                    Ok(Admission { target: target.clone() })
                } else {
                    Err(SnmpError::CircuitBreakerOpen(target.clone()))
                }
            }
            Phase::HalfOpen => {
                if state.half_open_calls < self.params.half_open_max_calls {
                    state.half_open_calls += 1;
                    Ok(Admission { target: target.clone() })
                } else {
                    // Probe budget exhausted without closing (§4.10): back to
                    // `open` and restart the recovery timer, rather than
                    // staying stuck in `half_open` rejecting forever.
                    state.phase = Phase::Open;
                    state.last_failure_time = Some(Instant::now());
                    warn!("breaker: {} half_open probe budget exhausted → open", target);
                    Err(SnmpError::CircuitBreakerOpen(target.clone()))
                }
            }
        }
    }

    pub fn on_success(&self, admission: Admission) {
        let guard = self.states.get(&admission.target).unwrap();
        let mut state = guard.lock().unwrap();
        match state.phase {
            Phase::Closed => {
                state.success_count += 1;
            }
            Phase::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.params.success_threshold_to_close {
                    state.phase = Phase::Closed;
                    state.fail_count = 0;
                    state.success_count = 0;
                    state.half_open_calls = 0;
                    info!("breaker: {} half_open → closed", admission.target);
                }
            }
            Phase::Open => {}
        }
    }

    pub fn on_failure(&self, admission: Admission, reason: impl Into<String>) {
        let guard = self.states.get(&admission.target).unwrap();
        let mut state = guard.lock().unwrap();
        let reason = reason.into();

        match state.phase {
            Phase::Closed => {
                state.fail_count += 1;
                state.last_failure_time = Some(Instant::now());
                state.last_failure_reason = Some(reason);
                if state.fail_count >= self.params.failure_threshold {
                    state.phase = Phase::Open;
                    warn!("breaker: {} closed → open after {} failures", admission.target, state.fail_count);
                }
            }
            Phase::HalfOpen => {
                state.phase = Phase::Open;
                state.last_failure_time = Some(Instant::now());
                state.last_failure_reason = Some(reason);
                state.success_count = 0;
                warn!("breaker: {} half_open probe failed → open", admission.target);
            }
            Phase::Open => {}
        }
    }

    pub fn phase(&self, target: &Target) -> Phase {
        self.ensure_entry(target);
        self.states.get(target).unwrap().lock().unwrap().phase
    }

    // Manual operator escape hatches (§4.10): never driven by automatic logic.
    pub fn force_open(&self, target: &Target) {
        self.ensure_entry(target);
        let guard = self.states.get(target).unwrap();
        let mut state = guard.lock().unwrap();
        state.phase = Phase::Open;
        state.last_failure_time = Some(Instant::now());
    }

    pub fn force_half_open(&self, target: &Target) {
        self.ensure_entry(target);
        let guard = self.states.get(target).unwrap();
        let mut state = guard.lock().unwrap();
        state.phase = Phase::HalfOpen;
        state.half_open_calls = 0;
    }

    pub fn reset(&self, target: &Target) {
        self.ensure_entry(target);
        let guard = self.states.get(target).unwrap();
        let mut state = guard.lock().unwrap();
        *state = BreakerState::new();
    }

    pub fn close(&self, target: &Target) {
        self.ensure_entry(target);
        let guard = self.states.get(target).unwrap();
        let mut state = guard.lock().unwrap();
        state.phase = Phase::Closed;
        state.fail_count = 0;
        state.success_count = 0;
        state.half_open_calls = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        "127.0.0.1:1161".parse().unwrap()
    }

    #[test]
    fn opens_after_failure_threshold_and_rejects_without_admitting() {
        let breaker = CircuitBreaker::new(BreakerParams { failure_threshold: 2, ..Default::default() });
        let t = target();

        let a1 = breaker.try_admit(&t).unwrap();
        breaker.on_failure(a1, "timeout");
        let a2 = breaker.try_admit(&t).unwrap();
        breaker.on_failure(a2, "timeout");

        assert_eq!(breaker.phase(&t), Phase::Open);
        assert!(matches!(breaker.try_admit(&t), Err(SnmpError::CircuitBreakerOpen(_))));
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(BreakerParams {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            success_threshold_to_close: 2,
            half_open_max_calls: 5,
        });
        let t = target();

        let a = breaker.try_admit(&t).unwrap();
        breaker.on_failure(a, "timeout");
        assert_eq!(breaker.phase(&t), Phase::Open);

        let a = breaker.try_admit(&t).unwrap(); // recovery_timeout_ms=0, immediately half_open
        assert_eq!(breaker.phase(&t), Phase::HalfOpen);
        breaker.on_success(a);
        let a = breaker.try_admit(&t).unwrap();
        breaker.on_success(a);

        assert_eq!(breaker.phase(&t), Phase::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerParams {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            ..Default::default()
        });
        let t = target();
        let a = breaker.try_admit(&t).unwrap();
        breaker.on_failure(a, "timeout");

        let a = breaker.try_admit(&t).unwrap();
        assert_eq!(breaker.phase(&t), Phase::HalfOpen);
        breaker.on_failure(a, "timeout again");
        assert_eq!(breaker.phase(&t), Phase::Open);
    }

    #[test]
    fn half_open_budget_exhaustion_without_closing_reopens() {
        // success_threshold_to_close is never reached within half_open_max_calls,
        // so the probe budget runs out while still half_open.
        let breaker = CircuitBreaker::new(BreakerParams {
            failure_threshold: 1,
            recovery_timeout_ms: 0,
            half_open_max_calls: 2,
            success_threshold_to_close: 5,
        });
        let t = target();

        let a = breaker.try_admit(&t).unwrap();
        breaker.on_failure(a, "timeout");
        assert_eq!(breaker.phase(&t), Phase::Open);

        let a = breaker.try_admit(&t).unwrap();
        assert_eq!(breaker.phase(&t), Phase::HalfOpen);
        breaker.on_success(a);
        let a = breaker.try_admit(&t).unwrap();
        breaker.on_success(a);

        // Budget (2 calls) is spent; further admission must reopen rather than
        // reject forever from a stuck half_open state.
        assert!(matches!(breaker.try_admit(&t), Err(SnmpError::CircuitBreakerOpen(_))));
        assert_eq!(breaker.phase(&t), Phase::Open);

        // And since recovery_timeout_ms is 0, a fresh recovery window opens
        // immediately rather than staying wedged.
        assert_eq!(breaker.try_admit(&t).map(|_| ()), Ok(()));
        assert_eq!(breaker.phase(&t), Phase::HalfOpen);
    }
}
