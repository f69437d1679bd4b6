//! Resilient venue connections.
//!
//! This crate keeps long-lived WebSocket connections to trading venues
//! alive: circuit breaking, exponential backoff, subscription tracking and
//! connection statistics, with decoded updates fanned out to subscribers.
//!
//! ## Architecture
//!
//! - `adapter` - `ExchangeAdapter` composing the services below with a `VenueConnector`
//! - `manager` / `event_handler` - connection status, subscriptions, reconnection scheduling
//! - `circuit_breaker` / `reconnection` / `stats` - failure gating, backoff, counters
//! - `websocket` - socket session driving a `TransportListener`
//! - `connector/` - venue-specific connectors
//! - `publisher` / `message` - event fan-out (`MarketEvent`, `ConnectionEvent`)

pub mod adapter;
pub mod circuit_breaker;
pub mod config;
pub mod connector;
pub mod error;
pub mod event_handler;
pub mod manager;
pub mod message;
pub mod publisher;
pub mod reconnection;
pub mod stats;
pub mod stream_url;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::*;
pub use circuit_breaker::*;
pub use config::*;
pub use connector::BinanceConnector;
pub use error::*;
pub use event_handler::*;
pub use manager::*;
pub use message::*;
pub use publisher::*;
pub use reconnection::*;
pub use stats::*;
pub use stream_url::*;
pub use websocket::*;
