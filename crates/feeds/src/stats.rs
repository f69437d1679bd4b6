//! Lock-free connection statistics.

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the tracker's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub total_reconnections: u64,
    pub total_messages_received: u64,
    pub total_errors: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Counters are independent; a snapshot is not a consistent cut across them.
#[derive(Debug, Default)]
pub struct StatsTracker {
    total_connections: AtomicU64,
    total_reconnections: AtomicU64,
    total_messages_received: AtomicU64,
    total_errors: AtomicU64,
    last_connected_at: AtomicCell<Option<DateTime<Utc>>>,
    last_message_at: AtomicCell<Option<DateTime<Utc>>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection attempt was started.
    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnection(&self) {
        self.total_reconnections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message_received(&self) {
        self.total_messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at.store(Some(Utc::now()));
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// The transport reported the connection as open.
    pub fn mark_connected(&self) {
        self.last_connected_at.store(Some(Utc::now()));
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_reconnections: self.total_reconnections.load(Ordering::Relaxed),
            total_messages_received: self.total_messages_received.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            last_connected_at: self.last_connected_at.load(),
            last_message_at: self.last_message_at.load(),
        }
    }

    pub fn reset(&self) {
        self.total_connections.store(0, Ordering::Relaxed);
        self.total_reconnections.store(0, Ordering::Relaxed);
        self.total_messages_received.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.last_connected_at.store(None);
        self.last_message_at.store(None);
    }
}
