//! Maps transport lifecycle callbacks onto the resilience services.

use crate::{CircuitBreaker, ConnectionManager, FeedError, ReconnectionStrategy, StatsTracker};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use venuelink_core::ConnectionStatus;

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Stateless glue between transport events and connection state.
///
/// Safe to call from any task; every method touches only atomics or the
/// breaker's own lock.
#[derive(Debug, Clone)]
pub struct ConnectionEventHandler {
    connection_manager: Arc<ConnectionManager>,
    stats: Arc<StatsTracker>,
    circuit_breaker: Arc<CircuitBreaker>,
    reconnection: Arc<ReconnectionStrategy>,
}

impl ConnectionEventHandler {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        stats: Arc<StatsTracker>,
        circuit_breaker: Arc<CircuitBreaker>,
        reconnection: Arc<ReconnectionStrategy>,
    ) -> Self {
        Self {
            connection_manager,
            stats,
            circuit_breaker,
            reconnection,
        }
    }

    /// Returns false, changing nothing, if the connection is no longer wanted
    /// (the status left CONNECTING before the socket opened).
    pub fn handle_connection_opened(&self, label: &str) -> bool {
        if !self.connection_manager.try_complete_connecting() {
            info!(
                "{}: WebSocket opened while {}, ignoring",
                label,
                self.connection_manager.status()
            );
            return false;
        }
        info!("{}: WebSocket connection opened", label);
        self.stats.mark_connected();
        self.reconnection.reset();
        self.circuit_breaker.record_success();
        true
    }

    #[inline]
    pub fn handle_message_received(&self) {
        self.stats.record_message_received();
    }

    /// A frame could not be processed; the connection itself is fine.
    pub fn handle_processing_error(&self, label: &str, error: &FeedError) {
        self.stats.record_error();
        warn!("{}: Failed to process message: {}", label, error);
    }

    pub fn handle_connection_closing(&self, label: &str, code: u16, reason: &str) {
        debug!("{}: WebSocket closing (code {}): {}", label, code, reason);
    }

    /// Returns true if a reconnection was requested.
    pub fn handle_connection_closed<F>(
        &self,
        label: &str,
        code: u16,
        reason: &str,
        schedule_reconnection: F,
    ) -> bool
    where
        F: FnOnce(),
    {
        self.connection_manager.update_status(ConnectionStatus::Disconnected);

        if code == NORMAL_CLOSURE {
            info!("{}: WebSocket closed normally: {}", label, reason);
            return false;
        }

        warn!("{}: WebSocket closed abnormally (code {}): {}", label, code, reason);
        self.circuit_breaker.record_failure();
        schedule_reconnection();
        true
    }

    pub fn handle_connection_failure<F>(&self, label: &str, error: &FeedError, schedule_reconnection: F)
    where
        F: FnOnce(),
    {
        error!("{}: WebSocket failure: {}", label, error);
        self.connection_manager.update_status(ConnectionStatus::Failed);
        self.stats.record_error();
        self.circuit_breaker.record_failure();
        schedule_reconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitBreakerConfig, ReconnectionConfig};
    use std::cell::Cell;
    use venuelink_core::CircuitBreakerState;

    struct Fixture {
        handler: ConnectionEventHandler,
        manager: Arc<ConnectionManager>,
        stats: Arc<StatsTracker>,
        breaker: Arc<CircuitBreaker>,
        strategy: Arc<ReconnectionStrategy>,
    }

    fn fixture() -> Fixture {
        let stats = Arc::new(StatsTracker::new());
        let breaker = Arc::new(CircuitBreaker::new("test", &CircuitBreakerConfig::default()));
        let strategy = Arc::new(ReconnectionStrategy::new("test", &ReconnectionConfig::default()));
        let manager = Arc::new(ConnectionManager::new(
            "test",
            breaker.clone(),
            strategy.clone(),
            stats.clone(),
        ));
        let handler =
            ConnectionEventHandler::new(manager.clone(), stats.clone(), breaker.clone(), strategy.clone());
        Fixture {
            handler,
            manager,
            stats,
            breaker,
            strategy,
        }
    }

    #[test]
    fn test_opened_resets_failure_tracking() {
        let f = fixture();
        f.breaker.record_failure();
        f.strategy.record_attempt();
        f.manager.try_begin_connecting();

        assert!(f.handler.handle_connection_opened("test"));

        assert_eq!(f.manager.status(), ConnectionStatus::Connected);
        assert!(f.stats.stats().last_connected_at.is_some());
        assert_eq!(f.strategy.current_attempt(), 0);
        assert_eq!(f.breaker.failure_count(), 0);
        assert_eq!(f.breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_open_after_disconnect_is_ignored() {
        let f = fixture();
        f.manager.try_begin_connecting();
        f.breaker.record_failure();
        f.manager.update_status(ConnectionStatus::Disconnected);

        assert!(!f.handler.handle_connection_opened("test"));
        assert_eq!(f.manager.status(), ConnectionStatus::Disconnected);
        assert!(f.stats.stats().last_connected_at.is_none());
        assert_eq!(f.breaker.failure_count(), 1);
    }

    #[test]
    fn test_processing_error_keeps_status() {
        let f = fixture();
        f.manager.update_status(ConnectionStatus::Connected);
        f.handler.handle_message_received();
        f.handler
            .handle_processing_error("test", &FeedError::ParseError("garbage".to_string()));

        let stats = f.stats.stats();
        assert_eq!(stats.total_messages_received, 1);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(f.manager.status(), ConnectionStatus::Connected);
        assert_eq!(f.breaker.failure_count(), 0);
    }

    #[test]
    fn test_closing_is_observational() {
        let f = fixture();
        f.manager.update_status(ConnectionStatus::Connected);
        f.handler.handle_connection_closing("test", 1001, "going away");
        assert_eq!(f.manager.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_normal_close_does_not_reconnect() {
        let f = fixture();
        f.manager.update_status(ConnectionStatus::Connected);
        let scheduled = Cell::new(false);

        let requested = f
            .handler
            .handle_connection_closed("test", NORMAL_CLOSURE, "bye", || scheduled.set(true));

        assert!(!requested);
        assert!(!scheduled.get());
        assert_eq!(f.manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(f.breaker.failure_count(), 0);
    }

    #[test]
    fn test_abnormal_close_reconnects() {
        let f = fixture();
        for code in [1001u16, 1006, 1011, 4000] {
            let scheduled = Cell::new(false);
            let requested = f
                .handler
                .handle_connection_closed("test", code, "network", || scheduled.set(true));
            assert!(requested, "code {}", code);
            assert!(scheduled.get(), "code {}", code);
        }
        assert_eq!(f.breaker.failure_count(), 4);
        assert_eq!(f.manager.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_failure_always_reconnects() {
        let f = fixture();
        let scheduled = Cell::new(0);

        f.handler.handle_connection_failure(
            "test",
            &FeedError::ConnectionFailed("refused".to_string()),
            || scheduled.set(scheduled.get() + 1),
        );

        assert_eq!(scheduled.get(), 1);
        assert_eq!(f.manager.status(), ConnectionStatus::Failed);
        assert_eq!(f.stats.stats().total_errors, 1);
        assert_eq!(f.breaker.failure_count(), 1);
    }
}
