//! Venue connectors plugged into [`ExchangeAdapter`](crate::ExchangeAdapter).

pub mod binance;

pub use binance::BinanceConnector;
