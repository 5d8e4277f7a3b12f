//! Bounded retry with exponential backoff, plus per-session retry counters.
//!
//! The executor is generic over the operation and its error; callers decide
//! what is retriable. Backoff sleeps wait on a `CancelToken` so a cancelled
//! send does not sit out its delay.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RetrySettings;

/// Fraction of the computed delay that jitter may add or remove
const JITTER_SPREAD: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self { max_retries, initial_delay, max_delay: Duration::from_secs(30), jitter: false }
    }

    /// Total attempts allowed, first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before `attempt` (1-based). Zero for the first attempt,
    /// `initial_delay * 2^(attempt-2)` afterwards, capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(31);
        let base = self.initial_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        if self.jitter && !base.is_zero() { jittered(base) } else { base }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms.max(s.initial_delay_ms)),
            jitter: s.jitter,
        }
    }
}

fn jittered(base: Duration) -> Duration {
    base.mul_f64(rand::rng().random_range(1.0 - JITTER_SPREAD..=1.0 + JITTER_SPREAD))
}

/// Result of running an operation under a retry policy.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub data: Option<T>,
    pub error: Option<E>,
    /// Attempts made beyond the first
    pub retry_count: u32,
    pub succeeded: bool,
    /// Stopped because the cancel token fired
    pub cancelled: bool,
}

/// Cooperative cancellation shared between the owner of a stream and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        if let Ok(mut cancelled) = lock.lock() {
            *cancelled = true;
            cvar.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().map(|c| *c).unwrap_or(true)
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    pub fn wait(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let Ok(mut cancelled) = lock.lock() else { return true };
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match cvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => cancelled = guard,
                Err(_) => return true,
            }
        }
        true
    }
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn execute<T, E, F, R>(&self, operation: F, is_retriable: R) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        self.execute_with(operation, is_retriable, |_, _, _| {})
    }

    /// Run `operation` (called with the 1-based attempt number) until it
    /// succeeds, fails with a non-retriable error, the budget runs out, or
    /// the cancel token fires. `on_retry` sees each failure that will be
    /// retried together with the upcoming attempt number and its delay.
    pub fn execute_with<T, E, F, R, N>(&self, mut operation: F, is_retriable: R, mut on_retry: N) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        R: Fn(&E) -> bool,
        N: FnMut(u32, Duration, &E),
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return RetryOutcome { data: None, error: None, retry_count: attempt - 1, succeeded: false, cancelled: true };
            }
            match operation(attempt) {
                Ok(data) => {
                    return RetryOutcome {
                        data: Some(data),
                        error: None,
                        retry_count: attempt - 1,
                        succeeded: true,
                        cancelled: false,
                    };
                }
                Err(error) => {
                    let exhausted = attempt >= max_attempts;
                    if exhausted || !is_retriable(&error) {
                        return RetryOutcome {
                            data: None,
                            error: Some(error),
                            retry_count: attempt - 1,
                            succeeded: false,
                            cancelled: false,
                        };
                    }
                    let delay = self.policy.delay_before(attempt + 1);
                    on_retry(attempt + 1, delay, &error);
                    if self.cancel.wait(delay) {
                        return RetryOutcome {
                            data: None,
                            error: Some(error),
                            retry_count: attempt - 1,
                            succeeded: false,
                            cancelled: true,
                        };
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Identifies a logical conversation session for retry budgeting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub user_id: String,
    pub session_id: String,
}

impl CorrelationKey {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), session_id: session_id.into() }
    }
}

/// Cumulative failed-attempt counts per session. Owned by the orchestrator.
#[derive(Debug, Default)]
pub struct RetryCounters {
    counts: HashMap<CorrelationKey, u32>,
}

impl RetryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CorrelationKey) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Record one failed attempt; returns the new count.
    pub fn increment(&mut self, key: &CorrelationKey) -> u32 {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&mut self, key: &CorrelationKey) {
        self.counts.remove(key);
    }
}
