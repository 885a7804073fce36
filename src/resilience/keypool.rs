use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{RelayError, Result};

use super::{system_clock, Clock};

#[derive(Clone, Debug)]
struct KeyEntry {
    key: String,
    /// Calls left before the provider rate limit, `None` when unknown.
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    exhausted: bool,
}

#[derive(Debug)]
struct PoolInner {
    entries: Vec<KeyEntry>,
    cursor: usize,
}

/// Round-robin api-key pool with per-key rate-limit awareness.
///
/// Exhausted keys are skipped during selection and revive lazily once
/// their reset instant has passed. Selection is O(n) in the number of
/// keys; all state transitions are serialized under one mutex that is
/// never held across I/O.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self::with_clock(keys, system_clock())
    }

    pub fn with_clock(keys: Vec<String>, clock: Arc<dyn Clock>) -> Self {
        let entries = keys
            .into_iter()
            .map(|key| KeyEntry {
                key,
                remaining: None,
                reset_at: None,
                exhausted: false,
            })
            .collect();
        Self {
            inner: Mutex::new(PoolInner { entries, cursor: 0 }),
            clock,
        }
    }

    /// Select the next available key, advancing the cursor past it so
    /// consecutive calls rotate fairly. Keys whose exhaustion cooldown
    /// has passed are revived on the way.
    pub fn next(&self) -> Result<String> {
        let mut inner = self.inner.lock().expect("key pool lock poisoned");
        let n = inner.entries.len();
        if n == 0 {
            return Err(RelayError::NoKeys);
        }

        let now = self.clock.now();
        let cursor = inner.cursor;
        for i in 0..n {
            let idx = (cursor + i) % n;
            let entry = &mut inner.entries[idx];

            if entry.exhausted && entry.reset_at.is_some_and(|reset| now >= reset) {
                entry.exhausted = false;
                entry.remaining = None;
            }

            if !entry.exhausted {
                let key = entry.key.clone();
                inner.cursor = (idx + 1) % n;
                return Ok(key);
            }
        }

        let earliest = inner
            .entries
            .iter()
            .filter_map(|entry| entry.reset_at)
            .min();
        let reset_in = earliest
            .map(|reset| reset.saturating_duration_since(now))
            .unwrap_or_default();
        Err(RelayError::KeysExhausted { reset_in })
    }

    /// Put a key on cooldown. Unknown keys are ignored so concurrent
    /// configuration changes stay harmless.
    pub fn mark_rate_limited(&self, key: &str, retry_after: Duration) {
        let reset_at = self.clock.now() + retry_after;
        let mut inner = self.inner.lock().expect("key pool lock poisoned");
        if let Some(entry) = inner.entries.iter_mut().find(|entry| entry.key == key) {
            entry.exhausted = true;
            entry.remaining = Some(0);
            entry.reset_at = Some(reset_at);
        }
    }

    /// Record a budget observed from provider rate-limit headers.
    pub fn update_remaining(&self, key: &str, remaining: u32, reset_after: Duration) {
        let reset_at = self.clock.now() + reset_after;
        let mut inner = self.inner.lock().expect("key pool lock poisoned");
        if let Some(entry) = inner.entries.iter_mut().find(|entry| entry.key == key) {
            entry.remaining = Some(remaining);
            entry.reset_at = Some(reset_at);
            if remaining == 0 {
                entry.exhausted = true;
            }
        }
    }

    /// Last known call budget for a key, `None` when unknown or when
    /// the key is not in the pool.
    pub fn remaining(&self, key: &str) -> Option<u32> {
        let inner = self.inner.lock().expect("key pool lock poisoned");
        inner
            .entries
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.remaining)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("key pool lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
