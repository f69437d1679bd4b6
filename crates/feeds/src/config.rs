//! Connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use venuelink_core::Exchange;

/// Backoff settings for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Delay before the first attempt (ms)
    pub min_delay_ms: u64,
    /// Upper bound for any single delay (ms)
    pub max_delay_ms: u64,
    /// Attempts before giving up and resting in FAILED
    pub max_attempts: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 300_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectionConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time the breaker stays open before allowing a trial (ms)
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 120_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Configuration for a single venue connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Base WebSocket URL
    pub ws_url: String,
    /// Venue identifier
    pub exchange: Exchange,
    pub reconnection: ReconnectionConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Ping interval to keep connection alive (ms)
    pub ping_interval_ms: u64,
    /// Connection timeout (ms)
    pub connect_timeout_ms: u64,
    /// No inbound frame for this long means the socket is dead (ms)
    pub stale_timeout_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            exchange: Exchange::Binance,
            reconnection: ReconnectionConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            ping_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            stale_timeout_ms: 120_000,
            event_buffer: 1_000,
        }
    }
}

impl ConnectorConfig {
    /// Create config for a specific exchange.
    pub fn for_exchange(exchange: Exchange) -> Self {
        let ws_url = match exchange {
            Exchange::Binance => "wss://stream.binance.com:9443/stream".to_string(),
            Exchange::Coinbase => "wss://ws-feed.exchange.coinbase.com".to_string(),
            Exchange::Kraken => "wss://ws.kraken.com".to_string(),
            Exchange::Okx => "wss://ws.okx.com:8443/ws/v5/public".to_string(),
            Exchange::Bybit => "wss://stream.bybit.com/v5/public/spot".to_string(),
            Exchange::Upbit => "wss://api.upbit.com/websocket/v1".to_string(),
            Exchange::Bithumb => "wss://pubwss.bithumb.com/pub/ws".to_string(),
            Exchange::GateIO => "wss://api.gateio.ws/ws/v4/".to_string(),
        };

        Self {
            ws_url,
            exchange,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connector_config_default() {
        let config = ConnectorConfig::default();
        assert_eq!(config.reconnection.max_attempts, 10);
        assert_eq!(config.reconnection.min_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnection.max_delay(), Duration::from_secs(300));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.open_timeout(), Duration::from_secs(120));
        assert!(config.ping_interval_ms > 0);
    }

    #[test]
    fn test_connector_config_for_exchange() {
        let binance = ConnectorConfig::for_exchange(Exchange::Binance);
        assert!(binance.ws_url.contains("binance"));
        assert_eq!(binance.exchange, Exchange::Binance);

        let coinbase = ConnectorConfig::for_exchange(Exchange::Coinbase);
        assert!(coinbase.ws_url.contains("coinbase"));
    }

    #[test]
    fn test_partial_config_deserialization() {
        let json = r#"{"exchange":"Bybit","reconnection":{"max_attempts":3}}"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.exchange, Exchange::Bybit);
        assert_eq!(config.reconnection.max_attempts, 3);
        assert_eq!(config.reconnection.min_delay_ms, 1_000);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }
}
