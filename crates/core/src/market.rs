//! Decoded market data handed from venue connectors to consumers.

use crate::Exchange;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Best bid/ask update for a trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Venue the quote came from
    pub exchange: Exchange,
    /// Venue symbol (e.g. "BTCUSDT")
    pub symbol: CompactString,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    /// Time the update was received or stamped by the venue
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdate {
    pub fn new(
        exchange: Exchange,
        symbol: impl AsRef<str>,
        bid: f64,
        ask: f64,
        bid_size: f64,
        ask_size: f64,
    ) -> Self {
        Self {
            exchange,
            symbol: CompactString::new(symbol),
            bid,
            ask,
            bid_size,
            ask_size,
            timestamp: Utc::now(),
        }
    }

    #[inline]
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    #[inline]
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// No further updates are expected for the order.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Execution report for one of our own orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub exchange: Exchange,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: CompactString,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: f64,
    pub quantity: f64,
    /// Cumulative filled quantity
    pub filled_quantity: f64,
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_price_update_mid_and_spread() {
        let update = PriceUpdate::new(Exchange::Binance, "BTCUSDT", 49999.0, 50001.0, 1.0, 2.0);
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.mid(), 50000.0);
        assert_eq!(update.spread(), 2.0);
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_order_remaining_quantity() {
        let order = OrderUpdate {
            exchange: Exchange::Binance,
            order_id: "42".to_string(),
            client_order_id: None,
            symbol: CompactString::new("ETHUSDT"),
            side: OrderSide::Buy,
            status: OrderStatus::PartiallyFilled,
            price: 3000.0,
            quantity: 2.0,
            filled_quantity: 0.5,
            timestamp: Utc::now(),
        };
        assert_eq!(order.remaining_quantity(), 1.5);
    }
}
