//! Circuit breaker gating new connection attempts.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! refuses connections. Once `open_timeout` has passed since the last failure
//! the next `can_connect()` moves it to half-open and lets one trial through;
//! a success closes it again, a failure re-opens it.

use crate::CircuitBreakerConfig;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use venuelink_core::CircuitBreakerState;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Thread-safe three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(label: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            label: label.into(),
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: config.open_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a new connection attempt is allowed.
    ///
    /// An open breaker whose timeout has elapsed transitions to half-open here.
    pub fn can_connect(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitBreakerState::HalfOpen;
                    info!("{}: Circuit breaker HALF_OPEN, allowing trial connection", self.label);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitBreakerState::Closed {
            info!("{}: Circuit breaker CLOSED after successful connection", self.label);
        }
        inner.state = CircuitBreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitBreakerState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitBreakerState::Open;
                warn!(
                    "{}: Circuit breaker OPEN after {} failures, blocking connections for {:?}",
                    self.label, inner.failure_count, self.open_timeout
                );
            }
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Open;
                warn!("{}: Trial connection failed, circuit breaker OPEN again", self.label);
            }
            _ => {}
        }
    }

    /// Operator override: force the breaker closed and forget failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        info!("{}: Circuit breaker manually reset", self.label);
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Time left before an open breaker allows a trial, None unless open.
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitBreakerState::Open {
            return None;
        }
        let elapsed = inner.last_failure.map(|at| at.elapsed()).unwrap_or(self.open_timeout);
        Some(self.open_timeout.saturating_sub(elapsed))
    }
}
