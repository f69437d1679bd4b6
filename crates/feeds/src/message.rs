//! Event types emitted towards domain consumers.
//!
//! Connectors decode frames into [`VenueUpdate`]s; the adapter forwards them
//! through the publisher as [`MarketEvent`]s, together with connection
//! lifecycle notifications.

use compact_str::CompactString;
use std::time::Duration;
use venuelink_core::{Exchange, OrderUpdate, PriceUpdate};

/// A decoded data frame from a venue.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueUpdate {
    Price(PriceUpdate),
    Order(OrderUpdate),
}

/// Message broadcast by the [`EventPublisher`](crate::EventPublisher).
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Price {
        /// Component that produced the event
        source: CompactString,
        /// Human-readable venue label
        exchange_label: CompactString,
        update: PriceUpdate,
    },
    Order {
        source: CompactString,
        exchange_label: CompactString,
        update: OrderUpdate,
    },
    Connection(ConnectionEvent),
}

/// Connection lifecycle notifications.
///
/// `Connected` is also sent after a successful reconnection; consumers
/// holding delta-based state should resync when they see it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected(Exchange),
    Disconnected(Exchange),
    /// Reconnection scheduled after the given delay
    Reconnecting(Exchange, Duration),
    /// Attempt failed or reconnection gave up
    Failed(Exchange, String),
    /// Circuit breaker refused a connection, retry allowed after the duration
    CircuitBreakerOpen(Exchange, Duration),
}

impl ConnectionEvent {
    pub fn exchange(&self) -> Exchange {
        match self {
            ConnectionEvent::Connected(exchange)
            | ConnectionEvent::Disconnected(exchange)
            | ConnectionEvent::Reconnecting(exchange, _)
            | ConnectionEvent::Failed(exchange, _)
            | ConnectionEvent::CircuitBreakerOpen(exchange, _) => *exchange,
        }
    }
}

impl MarketEvent {
    pub fn exchange(&self) -> Exchange {
        match self {
            MarketEvent::Price { update, .. } => update.exchange,
            MarketEvent::Order { update, .. } => update.exchange,
            MarketEvent::Connection(event) => event.exchange(),
        }
    }
}

impl From<PriceUpdate> for VenueUpdate {
    fn from(update: PriceUpdate) -> Self {
        VenueUpdate::Price(update)
    }
}

impl From<OrderUpdate> for VenueUpdate {
    fn from(update: OrderUpdate) -> Self {
        VenueUpdate::Order(update)
    }
}

impl From<ConnectionEvent> for MarketEvent {
    fn from(event: ConnectionEvent) -> Self {
        MarketEvent::Connection(event)
    }
}
