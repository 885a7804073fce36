use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{RelayError, Result};

use super::{system_clock, Clock};

/// Circuit breaker state. The numeric values are what the state gauge
/// reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

#[derive(Clone, Copy, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    successes: u64,
    failures: u64,
    rejections: u64,
}

/// Point-in-time view of a breaker, for observability.
#[derive(Clone, Copy, Debug)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

/// Per-provider circuit breaker. Trips open after a run of consecutive
/// failures and lazily transitions to half-open once the cooldown has
/// elapsed; any success while half-open closes it again.
///
/// The lock is held only to check admission and to record the outcome,
/// never across the wrapped call. Concurrent half-open probes are
/// allowed; whichever result lands first decides the next state.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                successes: 0,
                failures: 0,
                rejections: 0,
            }),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
            clock,
        }
    }

    /// Run `fut` through the breaker. Returns `CircuitOpen` without
    /// polling the future when the breaker rejects the call.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        if !self.admit() {
            return Err(RelayError::CircuitOpen);
        }

        let result = fut.await;
        self.record(result.is_ok());
        result
    }

    /// The state a caller observes: open breakers whose cooldown has
    /// elapsed report half-open without mutating.
    pub fn state(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        self.observed_state(&inner)
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            state: self.observed_state(&inner),
            consecutive_failures: inner.consecutive_failures,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
        }
    }

    fn observed_state(&self, inner: &BreakerInner) -> BreakerState {
        if inner.state == BreakerState::Open && self.cooldown_elapsed(inner) {
            return BreakerState::HalfOpen;
        }
        inner.state
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner) -> bool {
        match inner.last_failure {
            Some(last) => self.clock.now().duration_since(last) > self.cooldown,
            None => true,
        }
    }

    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.cooldown_elapsed(&inner) {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    inner.rejections += 1;
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if success {
            inner.successes += 1;
            inner.consecutive_failures = 0;
            if inner.state == BreakerState::HalfOpen {
                inner.state = BreakerState::Closed;
            }
        } else {
            inner.failures += 1;
            inner.consecutive_failures += 1;
            inner.last_failure = Some(self.clock.now());
            if inner.state == BreakerState::HalfOpen
                || inner.consecutive_failures >= self.failure_threshold
            {
                inner.state = BreakerState::Open;
            }
        }
    }
}
