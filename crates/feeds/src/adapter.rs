//! Public adapter composing the resilience services with a venue connector.
//!
//! A venue implements [`VenueConnector`] (the socket mechanics) and gets
//! wrapped in an [`ExchangeAdapter`], which owns connection status,
//! subscriptions, circuit breaking, backoff and statistics. The adapter
//! hands the connector a [`TransportListener`] on every connect; the
//! transport reports socket events through it.

use crate::{
    CircuitBreaker, ConnectionEvent, ConnectionEventHandler, ConnectionManager, ConnectionStats,
    ConnectorConfig, EventPublisher, EventReceiver, FeedError, ReconnectAction, ReconnectFuture,
    ReconnectionStrategy, StatsTracker, VenueUpdate,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use venuelink_core::{CircuitBreakerState, ConnectionStatus, Exchange, OrderUpdate, PriceUpdate};

/// Delay used by [`ExchangeAdapter::force_reconnect`].
pub const FORCE_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Source tag attached to published events.
pub const EVENT_SOURCE: &str = "exchange-adapter";

/// Venue-specific socket mechanics.
///
/// Hooks are only invoked by the adapter after its own checks have passed;
/// they should initiate the work and return, not wait for the socket to open.
#[async_trait]
pub trait VenueConnector: Send + Sync + 'static {
    fn exchange(&self) -> Exchange;

    /// Label used in logs and published events.
    fn exchange_name(&self) -> &str {
        self.exchange().as_str()
    }

    /// Start establishing the physical connection, reporting through `listener`.
    ///
    /// `subscriptions` holds what was tracked before the connection dropped so
    /// the venue can be resubscribed (empty on a fresh connect).
    async fn do_connect(
        &self,
        listener: Arc<dyn TransportListener>,
        subscriptions: &SubscriptionSnapshot,
    ) -> Result<(), FeedError>;

    async fn do_disconnect(&self) -> Result<(), FeedError>;

    async fn do_subscribe_to_price(&self, pair: &str) -> Result<(), FeedError>;

    async fn do_subscribe_to_order_updates(&self) -> Result<(), FeedError>;

    /// Decode an inbound text frame. `Ok(None)` marks a control frame
    /// (acks, heartbeats) that carries no update.
    fn decode_frame(&self, frame: &str) -> Result<Option<VenueUpdate>, FeedError> {
        let _ = frame;
        Ok(None)
    }
}

/// Socket lifecycle callbacks, each invoked at most once per transport event.
///
/// The adapter ignores callbacks from a listener whose connection it has
/// since abandoned (disconnected, force-reconnected or replaced).
pub trait TransportListener: Send + Sync {
    fn on_open(&self);

    fn on_frame(&self, frame: &str);

    /// Close handshake started (peer sent a close frame).
    fn on_closing(&self, code: u16, reason: &str);

    fn on_closed(&self, code: u16, reason: &str);

    fn on_failure(&self, error: FeedError);
}

/// Subscriptions tracked by the adapter at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub pairs: BTreeSet<String>,
    pub order_updates: bool,
}

impl SubscriptionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && !self.order_updates
    }
}

/// The resilience services an adapter is built from.
#[derive(Debug, Clone)]
pub struct AdapterServices {
    pub connection_manager: Arc<ConnectionManager>,
    pub stats: Arc<StatsTracker>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub reconnection: Arc<ReconnectionStrategy>,
}

impl AdapterServices {
    pub fn from_config(label: &str, config: &ConnectorConfig) -> Self {
        let stats = Arc::new(StatsTracker::new());
        let circuit_breaker = Arc::new(CircuitBreaker::new(label, &config.circuit_breaker));
        let reconnection = Arc::new(ReconnectionStrategy::new(label, &config.reconnection));
        let connection_manager = Arc::new(ConnectionManager::new(
            label,
            circuit_breaker.clone(),
            reconnection.clone(),
            stats.clone(),
        ));
        Self {
            connection_manager,
            stats,
            circuit_breaker,
            reconnection,
        }
    }
}

/// Serializable view of an adapter's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterHealth {
    pub exchange: Exchange,
    pub status: ConnectionStatus,
    pub circuit_breaker: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub reconnect_attempt: u32,
    pub reconnection_pending: bool,
    pub subscribed_pairs: Vec<String>,
    pub order_updates_subscribed: bool,
    pub stats: ConnectionStats,
}

struct AdapterInner<C: VenueConnector> {
    connector: C,
    label: String,
    exchange: Exchange,
    connection_manager: Arc<ConnectionManager>,
    stats: Arc<StatsTracker>,
    circuit_breaker: Arc<CircuitBreaker>,
    reconnection: Arc<ReconnectionStrategy>,
    event_handler: ConnectionEventHandler,
    publisher: EventPublisher,
    /// Identifies the listener of the connection currently wanted.
    generation: AtomicU64,
}

/// One resilient connection to one venue. Cheap to clone; clones share state.
pub struct ExchangeAdapter<C: VenueConnector> {
    inner: Arc<AdapterInner<C>>,
}

impl<C: VenueConnector> Clone for ExchangeAdapter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: VenueConnector> ExchangeAdapter<C> {
    pub fn new(connector: C, config: &ConnectorConfig, publisher: EventPublisher) -> Self {
        let services = AdapterServices::from_config(connector.exchange_name(), config);
        Self::with_services(connector, services, publisher)
    }

    pub fn with_services(connector: C, services: AdapterServices, publisher: EventPublisher) -> Self {
        let event_handler = ConnectionEventHandler::new(
            services.connection_manager.clone(),
            services.stats.clone(),
            services.circuit_breaker.clone(),
            services.reconnection.clone(),
        );
        let inner = AdapterInner {
            label: connector.exchange_name().to_string(),
            exchange: connector.exchange(),
            connector,
            connection_manager: services.connection_manager,
            stats: services.stats,
            circuit_breaker: services.circuit_breaker,
            reconnection: services.reconnection,
            event_handler,
            publisher,
            generation: AtomicU64::new(0),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Open the connection unless the breaker refuses or one is already up.
    ///
    /// Failures are never returned; they surface through the status, the
    /// stats and a scheduled reconnection.
    pub async fn connect(&self) {
        let inner = &self.inner;
        if !inner.connection_manager.can_connect() {
            let remaining = inner.circuit_breaker.remaining_open_time().unwrap_or_default();
            info!(
                "{}: Circuit breaker OPEN, connection refused (retry in {:?})",
                inner.label, remaining
            );
            inner
                .publisher
                .publish_connection_event(ConnectionEvent::CircuitBreakerOpen(inner.exchange, remaining));
            return;
        }
        if !inner.connection_manager.try_begin_connecting() {
            debug!("{}: Already connecting or connected", inner.label);
            return;
        }

        inner.stats.record_connection();
        inner.connection_manager.cancel_reconnection_task();
        info!("{}: Connecting", inner.label);

        let subscriptions = inner.subscriptions();
        if let Err(e) = inner.connector.do_connect(inner.listener(), &subscriptions).await {
            inner.handle_failure(e);
        }
    }

    /// Close the connection and forget subscriptions. Safe in any state.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        info!("{}: Disconnecting", inner.label);
        inner.retire_listener();
        inner.connection_manager.update_status(ConnectionStatus::Disconnected);
        inner.connection_manager.reset_subscriptions();
        inner.connection_manager.cancel_reconnection_task();

        if let Err(e) = inner.connector.do_disconnect().await {
            warn!("{}: Error while disconnecting: {}", inner.label, e);
        }
        inner
            .publisher
            .publish_connection_event(ConnectionEvent::Disconnected(inner.exchange));
    }

    pub async fn subscribe_to_price(&self, pair: &str) {
        let inner = &self.inner;
        if !inner.connection_manager.is_connected() {
            warn!("{}: Cannot subscribe to {} - not connected", inner.label, pair);
            return;
        }

        inner.connection_manager.add_subscription(pair);
        if let Err(e) = inner.connector.do_subscribe_to_price(pair).await {
            warn!("{}: Price subscription for {} failed: {}", inner.label, pair, e);
            inner.stats.record_error();
        }
    }

    pub async fn subscribe_to_order_updates(&self) {
        let inner = &self.inner;
        if !inner.connection_manager.is_connected() {
            warn!("{}: Cannot subscribe to order updates - not connected", inner.label);
            return;
        }

        inner.connection_manager.subscribe_to_order_updates();
        if let Err(e) = inner.connector.do_subscribe_to_order_updates().await {
            warn!("{}: Order update subscription failed: {}", inner.label, e);
            inner.stats.record_error();
        }
    }

    /// Drop the current socket now and reconnect after a fixed short delay,
    /// ignoring backoff and the circuit breaker for this one attempt.
    pub async fn force_reconnect(&self) {
        let inner = &self.inner;
        inner.retire_listener();
        let disconnect = async {
            if let Err(e) = inner.connector.do_disconnect().await {
                warn!("{}: Error while disconnecting: {}", inner.label, e);
            }
        };
        inner
            .connection_manager
            .force_reconnect(
                FORCE_RECONNECT_DELAY,
                disconnect,
                inner.reconnect_action(),
                &inner.label,
            )
            .await;
        inner
            .publisher
            .publish_connection_event(ConnectionEvent::Reconnecting(inner.exchange, FORCE_RECONNECT_DELAY));
    }

    /// Ingest a decoded price update.
    pub fn on_price_update(&self, update: PriceUpdate) {
        self.inner.on_price_update(update);
    }

    /// Ingest a decoded order update.
    pub fn on_order_update(&self, update: OrderUpdate) {
        self.inner.on_order_update(update);
    }

    pub fn exchange(&self) -> Exchange {
        self.inner.exchange
    }

    pub fn exchange_name(&self) -> &str {
        &self.inner.label
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection_manager.status()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.inner.stats.stats()
    }

    pub fn subscribed_pairs(&self) -> Vec<String> {
        self.inner.connection_manager.subscribed_pairs().into_iter().collect()
    }

    pub fn is_order_updates_subscribed(&self) -> bool {
        self.inner.connection_manager.is_order_updates_subscribed()
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerState {
        self.inner.circuit_breaker.state()
    }

    /// Time until an open breaker allows a trial connection.
    pub fn remaining_open_time(&self) -> Option<Duration> {
        self.inner.circuit_breaker.remaining_open_time()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Operator override closing the breaker after a venue outage.
    pub fn reset_circuit_breaker(&self) {
        self.inner.circuit_breaker.reset();
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.publisher.subscribe()
    }

    pub fn health(&self) -> AdapterHealth {
        let inner = &self.inner;
        AdapterHealth {
            exchange: inner.exchange,
            status: inner.connection_manager.status(),
            circuit_breaker: inner.circuit_breaker.state(),
            consecutive_failures: inner.circuit_breaker.failure_count(),
            reconnect_attempt: inner.reconnection.current_attempt(),
            reconnection_pending: inner.connection_manager.has_pending_reconnection(),
            subscribed_pairs: self.subscribed_pairs(),
            order_updates_subscribed: inner.connection_manager.is_order_updates_subscribed(),
            stats: inner.stats.stats(),
        }
    }
}

impl<C: VenueConnector> AdapterInner<C> {
    /// Listener for a new connection attempt, superseding earlier ones.
    fn listener(self: &Arc<Self>) -> Arc<dyn TransportListener> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        Arc::new(AdapterListener {
            inner: Arc::downgrade(self),
            generation,
        })
    }

    fn retire_listener(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn subscriptions(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            pairs: self.connection_manager.subscribed_pairs(),
            order_updates: self.connection_manager.is_order_updates_subscribed(),
        }
    }

    fn on_price_update(&self, update: PriceUpdate) {
        self.stats.record_message_received();
        self.publisher.publish_price_update(EVENT_SOURCE, update, &self.label);
    }

    fn on_order_update(&self, update: OrderUpdate) {
        self.stats.record_message_received();
        self.publisher.publish_order_update(EVENT_SOURCE, update, &self.label);
    }

    fn ingest_frame(&self, frame: &str) {
        match self.connector.decode_frame(frame) {
            Ok(Some(VenueUpdate::Price(update))) => self.on_price_update(update),
            Ok(Some(VenueUpdate::Order(update))) => self.on_order_update(update),
            Ok(None) => self.event_handler.handle_message_received(),
            Err(e) => {
                self.event_handler.handle_message_received();
                self.event_handler.handle_processing_error(&self.label, &e);
            }
        }
    }

    fn handle_failure(self: &Arc<Self>, error: FeedError) {
        self.event_handler
            .handle_connection_failure(&self.label, &error, || self.schedule_reconnection());
        self.publisher
            .publish_connection_event(ConnectionEvent::Failed(self.exchange, error.to_string()));
    }

    fn handle_closed(self: &Arc<Self>, code: u16, reason: &str) {
        let reconnecting = self
            .event_handler
            .handle_connection_closed(&self.label, code, reason, || self.schedule_reconnection());
        if !reconnecting {
            self.publisher
                .publish_connection_event(ConnectionEvent::Disconnected(self.exchange));
        }
    }

    fn schedule_reconnection(self: &Arc<Self>) {
        let delay = self.reconnection.next_delay();
        let scheduled = self
            .connection_manager
            .schedule_reconnection_based_on_strategy(self.reconnect_action(), &self.label);

        let event = if scheduled {
            ConnectionEvent::Reconnecting(self.exchange, delay)
        } else {
            ConnectionEvent::Failed(self.exchange, "reconnection attempts exhausted".to_string())
        };
        self.publisher.publish_connection_event(event);
    }

    fn reconnect_action(self: &Arc<Self>) -> ReconnectAction {
        let inner: Weak<Self> = Arc::downgrade(self);
        Box::new(move || -> ReconnectFuture {
            async move {
                match inner.upgrade() {
                    Some(inner) => inner.reconnect().await,
                    None => Ok(()),
                }
            }
            .boxed()
        })
    }

    async fn reconnect(self: Arc<Self>) -> Result<(), FeedError> {
        if !self.connection_manager.try_begin_connecting() {
            debug!("{}: Connection already re-established, skipping attempt", self.label);
            return Ok(());
        }

        info!("{}: Reconnecting", self.label);
        let subscriptions = self.subscriptions();
        let result = self.connector.do_connect(self.listener(), &subscriptions).await;
        if let Err(e) = &result {
            self.stats.record_error();
            self.circuit_breaker.record_failure();
            self.publisher
                .publish_connection_event(ConnectionEvent::Failed(self.exchange, e.to_string()));
        }
        result
    }
}

struct AdapterListener<C: VenueConnector> {
    inner: Weak<AdapterInner<C>>,
    generation: u64,
}

impl<C: VenueConnector> AdapterListener<C> {
    fn current(&self) -> Option<Arc<AdapterInner<C>>> {
        let inner = self.inner.upgrade()?;
        if inner.generation.load(Ordering::Acquire) != self.generation {
            debug!("{}: Ignoring callback from an abandoned connection", inner.label);
            return None;
        }
        Some(inner)
    }
}

impl<C: VenueConnector> TransportListener for AdapterListener<C> {
    fn on_open(&self) {
        if let Some(inner) = self.current() {
            if inner.event_handler.handle_connection_opened(&inner.label) {
                inner
                    .publisher
                    .publish_connection_event(ConnectionEvent::Connected(inner.exchange));
            }
        }
    }

    fn on_frame(&self, frame: &str) {
        if let Some(inner) = self.current() {
            inner.ingest_frame(frame);
        }
    }

    fn on_closing(&self, code: u16, reason: &str) {
        if let Some(inner) = self.current() {
            inner.event_handler.handle_connection_closing(&inner.label, code, reason);
        }
    }

    fn on_closed(&self, code: u16, reason: &str) {
        if let Some(inner) = self.current() {
            inner.handle_closed(code, reason);
        }
    }

    fn on_failure(&self, error: FeedError) {
        if let Some(inner) = self.current() {
            inner.handle_failure(error);
        }
    }
}
