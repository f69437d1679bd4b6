//! Venue identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Venue a connection is made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Exchange {
    Binance = 100,
    Coinbase = 101,
    Kraken = 102,
    Okx = 103,
    Bybit = 104,
    Upbit = 105,
    Bithumb = 106,
    GateIO = 107,
}

/// Returned when a venue name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl Exchange {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            100 => Some(Exchange::Binance),
            101 => Some(Exchange::Coinbase),
            102 => Some(Exchange::Kraken),
            103 => Some(Exchange::Okx),
            104 => Some(Exchange::Bybit),
            105 => Some(Exchange::Upbit),
            106 => Some(Exchange::Bithumb),
            107 => Some(Exchange::GateIO),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::Coinbase => "Coinbase",
            Exchange::Kraken => "Kraken",
            Exchange::Okx => "OKX",
            Exchange::Bybit => "Bybit",
            Exchange::Upbit => "Upbit",
            Exchange::Bithumb => "Bithumb",
            Exchange::GateIO => "Gate.io",
        }
    }

    pub fn all() -> &'static [Exchange] {
        &[
            Exchange::Binance,
            Exchange::Coinbase,
            Exchange::Kraken,
            Exchange::Okx,
            Exchange::Bybit,
            Exchange::Upbit,
            Exchange::Bithumb,
            Exchange::GateIO,
        ]
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = UnknownExchange;

    /// Case-insensitive; accepts both the display name and the bare
    /// lowercase form ("gateio" as well as "Gate.io").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('.', "");
        Exchange::all()
            .iter()
            .copied()
            .find(|exchange| exchange.as_str().to_lowercase().replace('.', "") == wanted)
            .ok_or_else(|| UnknownExchange(s.to_string()))
    }
}
