//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use venuelink_core::Exchange;
use venuelink_feeds::ConnectorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging level.
    pub log_level: String,
    /// Seconds between health reports.
    pub health_interval_secs: u64,
    /// Venues to connect to.
    pub venues: Vec<VenueSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            health_interval_secs: 30,
            venues: vec![VenueSettings::new(Exchange::Binance)],
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueSettings> {
        self.venues.iter().filter(|venue| venue.enabled)
    }
}

/// Per-venue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSettings {
    pub exchange: Exchange,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Pairs to subscribe once connected, in venue notation.
    #[serde(default)]
    pub pairs: Vec<String>,
    #[serde(default)]
    pub order_updates: bool,
    /// User data stream key; `BINANCE_LISTEN_KEY` is used when absent.
    #[serde(default)]
    pub listen_key: Option<String>,
    /// Overrides for the connection parameters.
    #[serde(default)]
    pub connection: Option<ConnectorConfig>,
}

fn default_true() -> bool {
    true
}

impl VenueSettings {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            enabled: true,
            pairs: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            order_updates: false,
            listen_key: None,
            connection: None,
        }
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        self.connection
            .clone()
            .unwrap_or_else(|| ConnectorConfig::for_exchange(self.exchange))
    }
}
