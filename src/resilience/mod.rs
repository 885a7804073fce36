//! Resiliency patterns for the proxy: retry with backoff, circuit
//! breaking, and api-key rotation.

mod breaker;
mod keypool;
mod retry;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use keypool::KeyPool;
pub use retry::{retry, RetryConfig};

use std::sync::Arc;
use std::time::Instant;

/// Time source for the breaker and key pool, swappable under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub(crate) fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
