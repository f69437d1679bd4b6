//! Connection lifecycle and circuit breaker states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single venue connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected
///      ^              |             |
///      |              v             v
///      +------- Failed/Disconnected (abnormal)
///                     |
///                     v
///               Reconnecting -> Connecting ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionStatus {
    /// True while a physical connection is being established or is up.
    #[inline]
    pub fn is_connecting_or_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }

    #[inline]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Reconnecting => "RECONNECTING",
            ConnectionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the connection circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Normal operation, connections allowed.
    #[default]
    Closed,
    /// Too many failures, connections refused.
    Open,
    /// Cool-down elapsed, a trial connection is allowed.
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitBreakerState::Closed => "CLOSED",
            CircuitBreakerState::Open => "OPEN",
            CircuitBreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
