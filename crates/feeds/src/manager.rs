//! Connection state ownership and reconnection scheduling.
//!
//! The manager is the only writer of the connection status, the subscription
//! set and the pending reconnection handle. Each of those lives in its own
//! atomic or concurrent container; nothing guarantees that a reader sees the
//! status and the subscriptions change together.

use crate::{CircuitBreaker, FeedError, ReconnectionStrategy, StatsTracker};
use crossbeam::atomic::AtomicCell;
use dashmap::DashSet;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use venuelink_core::ConnectionStatus;

/// Future performing one reconnection attempt.
pub type ReconnectFuture = BoxFuture<'static, Result<(), FeedError>>;

/// Deferred reconnection attempt, invoked at most once when its timer fires.
pub type ReconnectAction = Box<dyn FnOnce() -> ReconnectFuture + Send>;

const TASK_PENDING: u8 = 0;
const TASK_FIRED: u8 = 1;
const TASK_CANCELLED: u8 = 2;

/// Handle to a scheduled reconnection.
///
/// Cancelling only suppresses an attempt that has not started yet; once the
/// timer has fired the attempt runs to completion and `cancel` is a no-op.
#[derive(Debug)]
pub struct ReconnectionTask {
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl ReconnectionTask {
    /// Returns true if this call prevented the attempt from running.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(TASK_PENDING, TASK_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            self.handle.abort();
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == TASK_PENDING
    }
}

/// Whether a scheduled attempt waits for the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Breaker,
    Bypass,
}

/// Owns the connection status and subscriptions of one venue connection.
#[derive(Debug)]
pub struct ConnectionManager {
    label: String,
    status: AtomicCell<ConnectionStatus>,
    subscribed_pairs: DashSet<String>,
    order_updates_subscribed: AtomicBool,
    pending_reconnection: Mutex<Option<ReconnectionTask>>,
    circuit_breaker: Arc<CircuitBreaker>,
    reconnection: Arc<ReconnectionStrategy>,
    stats: Arc<StatsTracker>,
}

impl ConnectionManager {
    pub fn new(
        label: impl Into<String>,
        circuit_breaker: Arc<CircuitBreaker>,
        reconnection: Arc<ReconnectionStrategy>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        Self {
            label: label.into(),
            status: AtomicCell::new(ConnectionStatus::Disconnected),
            subscribed_pairs: DashSet::new(),
            order_updates_subscribed: AtomicBool::new(false),
            pending_reconnection: Mutex::new(None),
            circuit_breaker,
            reconnection,
            stats,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<ReconnectionTask>> {
        self.pending_reconnection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn can_connect(&self) -> bool {
        self.circuit_breaker.can_connect()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    pub fn is_connecting_or_connected(&self) -> bool {
        self.status().is_connecting_or_connected()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Last writer wins; transition legality is up to the caller.
    pub fn update_status(&self, status: ConnectionStatus) {
        let previous = self.status.swap(status);
        if previous != status {
            info!("{}: Connection status {} -> {}", self.label, previous, status);
        }
    }

    /// Atomically move to CONNECTING unless already connecting or connected.
    pub fn try_begin_connecting(&self) -> bool {
        let mut current = self.status.load();
        loop {
            if current.is_connecting_or_connected() {
                return false;
            }
            match self.status.compare_exchange(current, ConnectionStatus::Connecting) {
                Ok(_) => {
                    info!(
                        "{}: Connection status {} -> {}",
                        self.label,
                        current,
                        ConnectionStatus::Connecting
                    );
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Move CONNECTING to CONNECTED; false if the attempt was abandoned meanwhile.
    pub fn try_complete_connecting(&self) -> bool {
        let completed = self
            .status
            .compare_exchange(ConnectionStatus::Connecting, ConnectionStatus::Connected)
            .is_ok();
        if completed {
            info!(
                "{}: Connection status {} -> {}",
                self.label,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected
            );
        }
        completed
    }

    pub fn add_subscription(&self, pair: &str) -> bool {
        let added = self.subscribed_pairs.insert(pair.to_string());
        if added {
            debug!("{}: Tracking subscription {}", self.label, pair);
        }
        added
    }

    pub fn subscribe_to_order_updates(&self) {
        self.order_updates_subscribed.store(true, Ordering::Release);
    }

    pub fn subscribed_pairs(&self) -> BTreeSet<String> {
        self.subscribed_pairs.iter().map(|pair| pair.key().clone()).collect()
    }

    pub fn is_order_updates_subscribed(&self) -> bool {
        self.order_updates_subscribed.load(Ordering::Acquire)
    }

    pub fn reset_subscriptions(&self) {
        self.subscribed_pairs.clear();
        self.order_updates_subscribed.store(false, Ordering::Release);
    }

    pub fn has_pending_reconnection(&self) -> bool {
        self.pending().as_ref().is_some_and(ReconnectionTask::is_pending)
    }

    /// Schedule `action` after the strategy's next delay.
    ///
    /// When the timer fires while the circuit breaker is open, the attempt is
    /// pushed back until the breaker allows a trial. Returns false, leaving
    /// the status FAILED, once the strategy has given up.
    pub fn schedule_reconnection_based_on_strategy(
        self: &Arc<Self>,
        action: ReconnectAction,
        label: &str,
    ) -> bool {
        if !self.reconnection.should_reconnect() {
            error!(
                "{}: Giving up after {}/{} reconnection attempts",
                label,
                self.reconnection.current_attempt(),
                self.reconnection.max_attempts()
            );
            self.update_status(ConnectionStatus::Failed);
            return false;
        }

        let delay = self.reconnection.next_delay();
        self.update_status(ConnectionStatus::Reconnecting);
        info!(
            "{}: Reconnecting in {:.1}s (attempt #{})",
            label,
            delay.as_secs_f64(),
            self.reconnection.current_attempt() + 1
        );
        self.schedule_with_delay(delay, action, label, Gate::Breaker);
        true
    }

    pub fn cancel_reconnection_task(&self) {
        if let Some(task) = self.pending().take() {
            if task.cancel() {
                debug!("{}: Cancelled pending reconnection", self.label);
            }
        }
    }

    /// Disconnect now and reconnect after a fixed `delay`, bypassing backoff.
    pub async fn force_reconnect<D>(
        self: &Arc<Self>,
        delay: Duration,
        disconnect_action: D,
        connect_action: ReconnectAction,
        label: &str,
    ) where
        D: Future<Output = ()>,
    {
        info!("{}: Forcing reconnection in {:?}", label, delay);
        self.cancel_reconnection_task();
        disconnect_action.await;
        self.update_status(ConnectionStatus::Reconnecting);
        self.schedule_with_delay(delay, connect_action, label, Gate::Bypass);
    }

    fn schedule_with_delay(
        self: &Arc<Self>,
        delay: Duration,
        action: ReconnectAction,
        label: &str,
        gate: Gate,
    ) {
        let state = Arc::new(AtomicU8::new(TASK_PENDING));
        let task_state = state.clone();
        let manager: Weak<Self> = Arc::downgrade(self);
        let label = label.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if task_state
                .compare_exchange(TASK_PENDING, TASK_FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                manager.run_reconnection(action, &label, gate).await;
            }
        });

        let previous = self.pending().replace(ReconnectionTask { state, handle });
        if let Some(previous) = previous {
            if previous.cancel() {
                warn!("{}: Replaced an already pending reconnection", self.label);
            }
        }
    }

    async fn run_reconnection(self: Arc<Self>, action: ReconnectAction, label: &str, gate: Gate) {
        // A manual connect won the race
        if self.is_connecting_or_connected() {
            debug!("{}: Connection already re-established, skipping attempt", label);
            return;
        }

        // An open breaker defers the attempt until its trial is due
        if gate == Gate::Breaker && !self.can_connect() {
            let remaining = self.circuit_breaker.remaining_open_time().unwrap_or_default();
            info!(
                "{}: {}, deferring reconnection",
                label,
                FeedError::CircuitOpen(remaining)
            );
            self.update_status(ConnectionStatus::Reconnecting);
            self.schedule_with_delay(remaining, action, label, gate);
            return;
        }

        self.reconnection.record_attempt();
        self.stats.record_reconnection();

        let outcome = AssertUnwindSafe(async move { action().await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => debug!("{}: Reconnection attempt dispatched", label),
            Ok(Err(e)) => {
                error!("{}: Reconnection attempt failed: {}", label, e);
                self.update_status(ConnectionStatus::Failed);
            }
            Err(panic) => {
                let e = FeedError::ReconnectionPanicked(panic_message(panic.as_ref()));
                error!("{}: {}", label, e);
                self.update_status(ConnectionStatus::Failed);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitBreakerConfig, ReconnectionConfig};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use venuelink_core::CircuitBreakerState;

    fn manager_with(config: &ReconnectionConfig) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            "test",
            Arc::new(CircuitBreaker::new("test", &CircuitBreakerConfig::default())),
            Arc::new(ReconnectionStrategy::new("test", config)),
            Arc::new(StatsTracker::new()),
        ))
    }

    fn manager() -> Arc<ConnectionManager> {
        manager_with(&ReconnectionConfig::default())
    }

    fn counting_action(counter: &Arc<AtomicUsize>) -> ReconnectAction {
        let counter = counter.clone();
        Box::new(move || -> ReconnectFuture {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[test]
    fn test_initial_state() {
        let manager = manager();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(!manager.is_connecting_or_connected());
        assert!(manager.can_connect());
        assert!(manager.subscribed_pairs().is_empty());
        assert!(!manager.is_order_updates_subscribed());
        assert!(!manager.has_pending_reconnection());
    }

    #[test]
    fn test_update_status_last_writer_wins() {
        let manager = manager();
        manager.update_status(ConnectionStatus::Connected);
        assert!(manager.is_connected());
        // No transition validation at this layer
        manager.update_status(ConnectionStatus::Reconnecting);
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
    }

    #[test]
    fn test_try_begin_connecting() {
        let manager = manager();
        assert!(manager.try_begin_connecting());
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert!(!manager.try_begin_connecting());

        manager.update_status(ConnectionStatus::Failed);
        assert!(manager.try_begin_connecting());

        manager.update_status(ConnectionStatus::Connected);
        assert!(!manager.try_begin_connecting());
    }

    #[test]
    fn test_try_complete_connecting() {
        let manager = manager();
        assert!(!manager.try_complete_connecting());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.try_begin_connecting();
        assert!(manager.try_complete_connecting());
        assert!(manager.is_connected());
        assert!(!manager.try_complete_connecting());
    }

    #[test]
    fn test_subscriptions() {
        let manager = manager();
        assert!(manager.add_subscription("BTCUSDT"));
        assert!(manager.add_subscription("ETHUSDT"));
        assert!(!manager.add_subscription("BTCUSDT"));
        manager.subscribe_to_order_updates();

        let pairs: Vec<String> = manager.subscribed_pairs().into_iter().collect();
        assert_eq!(pairs, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert!(manager.is_order_updates_subscribed());

        manager.reset_subscriptions();
        assert!(manager.subscribed_pairs().is_empty());
        assert!(!manager.is_order_updates_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_strategy_delay() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));

        assert!(manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test"));
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
        assert!(manager.has_pending_reconnection());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.reconnection.current_attempt(), 1);
        assert_eq!(manager.stats.stats().total_reconnections, 1);
        assert!(!manager.has_pending_reconnection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_pending_attempt() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));

        manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test");
        manager.cancel_reconnection_task();
        manager.cancel_reconnection_task();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(manager.reconnection.current_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));

        manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test");
        tokio::time::sleep(Duration::from_secs(2)).await;
        manager.cancel_reconnection_task();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_schedule_replaces_pending() {
        let manager = manager();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        manager.schedule_reconnection_based_on_strategy(counting_action(&first), "test");
        manager.schedule_reconnection_based_on_strategy(counting_action(&second), "test");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_strategy_fails_without_scheduling() {
        let config = ReconnectionConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let manager = manager_with(&config);
        manager.reconnection.record_attempt();

        let runs = Arc::new(AtomicUsize::new(0));
        assert!(!manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test"));
        assert_eq!(manager.status(), ConnectionStatus::Failed);
        assert!(!manager.has_pending_reconnection());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_action_sets_failed() {
        let manager = manager();
        let action: ReconnectAction = Box::new(|| -> ReconnectFuture {
            async { Err(FeedError::ConnectionFailed("refused".to_string())) }.boxed()
        });

        manager.schedule_reconnection_based_on_strategy(action, "test");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.status(), ConnectionStatus::Failed);
        assert!(!manager.has_pending_reconnection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_sets_failed() {
        let manager = manager();
        let action: ReconnectAction = Box::new(|| -> ReconnectFuture { panic!("socket exploded") });

        manager.schedule_reconnection_based_on_strategy(action, "test");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.status(), ConnectionStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_uses_fixed_delay() {
        let manager = manager();
        for _ in 0..6 {
            manager.reconnection.record_attempt();
        }
        let order = Arc::new(Mutex::new(Vec::new()));

        let disconnect_order = order.clone();
        let connect_order = order.clone();
        let connect: ReconnectAction = Box::new(move || -> ReconnectFuture {
            async move {
                connect_order.lock().unwrap().push("connect");
                Ok(())
            }
            .boxed()
        });

        manager
            .force_reconnect(
                Duration::from_secs(1),
                async move { disconnect_order.lock().unwrap().push("disconnect") },
                connect,
                "test",
            )
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["disconnect"]);
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(*order.lock().unwrap(), vec!["disconnect", "connect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_skipped_when_already_connected() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));

        manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test");
        manager.update_status(ConnectionStatus::Connected);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(manager.reconnection.current_attempt(), 0);
        assert_eq!(manager.stats.stats().total_reconnections, 0);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_defers_attempt_until_half_open() {
        let manager = manager();
        for _ in 0..5 {
            manager.circuit_breaker.record_failure();
        }
        let runs = Arc::new(AtomicUsize::new(0));

        manager.schedule_reconnection_based_on_strategy(counting_action(&runs), "test");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(manager.status(), ConnectionStatus::Reconnecting);
        assert!(manager.has_pending_reconnection());
        assert_eq!(manager.reconnection.current_attempt(), 0);

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.circuit_breaker.state(), CircuitBreakerState::HalfOpen);
        assert_eq!(manager.reconnection.current_attempt(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reconnect_ignores_open_breaker() {
        let manager = manager();
        for _ in 0..5 {
            manager.circuit_breaker.record_failure();
        }
        let runs = Arc::new(AtomicUsize::new(0));

        manager
            .force_reconnect(Duration::from_secs(1), async {}, counting_action(&runs), "test")
            .await;
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.circuit_breaker.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn test_can_connect_follows_breaker() {
        let manager = manager();
        for _ in 0..5 {
            manager.circuit_breaker.record_failure();
        }
        assert_eq!(manager.circuit_breaker.state(), CircuitBreakerState::Open);
        assert!(!manager.can_connect());
    }
}
