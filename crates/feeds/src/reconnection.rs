//! Exponential backoff policy for reconnection attempts.

use crate::ReconnectionConfig;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Tracks reconnection attempts and computes the delay before the next one.
///
/// Attempt 0 waits `min_delay`; attempt n waits `min_delay * 2^n`, capped at
/// `max_delay`. With the defaults that is 1s, 2s, 4s, ... 256s, 300s.
#[derive(Debug)]
pub struct ReconnectionStrategy {
    label: String,
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: AtomicU32,
    last_attempt_time: AtomicCell<Option<DateTime<Utc>>>,
}

impl ReconnectionStrategy {
    pub fn new(label: impl Into<String>, config: &ReconnectionConfig) -> Self {
        Self {
            label: label.into(),
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
            current_attempt: AtomicU32::new(0),
            last_attempt_time: AtomicCell::new(None),
        }
    }

    pub fn should_reconnect(&self) -> bool {
        self.current_attempt() < self.max_attempts
    }

    /// Delay for the attempt about to be made, from the current count.
    pub fn next_delay(&self) -> Duration {
        let attempt = self.current_attempt();
        if attempt == 0 {
            return self.min_delay.min(self.max_delay);
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Bookkeeping made right before the reconnection action runs.
    pub fn record_attempt(&self) {
        let max = self.max_attempts;
        let previous = self
            .current_attempt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some((n + 1).min(max)))
            .unwrap_or(max);
        self.last_attempt_time.store(Some(Utc::now()));
        debug!(
            "{}: Reconnection attempt {}/{}",
            self.label,
            (previous + 1).min(max),
            max
        );
    }

    /// Called once the connection is re-established.
    pub fn reset(&self) {
        let previous = self.current_attempt.swap(0, Ordering::AcqRel);
        if previous > 0 {
            info!("{}: Connection recovered after {} attempt(s)", self.label, previous);
        }
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt.load(Ordering::Acquire)
    }

    pub fn last_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_time.load()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
