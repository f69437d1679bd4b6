//! Binance spot connector.
//!
//! Streams are carried in the combined-stream URL so a reconnect resubscribes
//! on its own; live subscriptions go out as `SUBSCRIBE` requests.

use crate::stream_url::{build_stream_url, join_streams, stream_names};
use crate::{
    ConnectorConfig, FeedError, SubscriptionSnapshot, TransportListener, VenueConnector, VenueUpdate,
    WsTransport,
};
use async_trait::async_trait;
use chrono::DateTime;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use venuelink_core::{Exchange, OrderSide, OrderStatus, OrderUpdate, PriceUpdate};

const BOOK_TICKER: &str = "bookTicker";

/// Binance spot connector over combined streams.
///
/// Price subscriptions use `<pair>@bookTicker`. Order updates need a user
/// data stream listen key, which is subscribed as a stream of its own.
pub struct BinanceConnector {
    ws_url: String,
    listen_key: Option<String>,
    transport: WsTransport,
    next_request_id: AtomicU64,
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct BinanceBookTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "A")]
    ask_qty: String,
}

#[derive(Debug, Deserialize)]
struct BinanceExecutionReport {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", default)]
    client_order_id: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "z")]
    filled_quantity: String,
}

fn parse_decimal(field: &str, value: &str) -> Result<f64, FeedError> {
    value
        .parse::<f64>()
        .map_err(|e| FeedError::ParseError(format!("{} '{}': {}", field, value, e)))
}

impl BinanceBookTicker {
    fn into_update(self) -> Result<PriceUpdate, FeedError> {
        Ok(PriceUpdate::new(
            Exchange::Binance,
            &self.symbol,
            parse_decimal("bid", &self.bid)?,
            parse_decimal("ask", &self.ask)?,
            parse_decimal("bid_qty", &self.bid_qty)?,
            parse_decimal("ask_qty", &self.ask_qty)?,
        ))
    }
}

impl BinanceExecutionReport {
    fn into_update(self) -> Result<OrderUpdate, FeedError> {
        let side = match self.side.as_str() {
            "BUY" => OrderSide::Buy,
            "SELL" => OrderSide::Sell,
            other => return Err(FeedError::ParseError(format!("Unknown order side: {}", other))),
        };
        let status = match self.status.as_str() {
            "NEW" | "PENDING_NEW" | "PENDING_CANCEL" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            other => return Err(FeedError::ParseError(format!("Unknown order status: {}", other))),
        };
        let timestamp = DateTime::from_timestamp_millis(self.event_time)
            .ok_or_else(|| FeedError::ParseError(format!("Invalid event time: {}", self.event_time)))?;

        Ok(OrderUpdate {
            exchange: Exchange::Binance,
            order_id: self.order_id.to_string(),
            client_order_id: Some(self.client_order_id).filter(|id| !id.is_empty()),
            symbol: CompactString::new(&self.symbol),
            side,
            status,
            price: parse_decimal("price", &self.price)?,
            quantity: parse_decimal("quantity", &self.quantity)?,
            filled_quantity: parse_decimal("filled_quantity", &self.filled_quantity)?,
            timestamp,
        })
    }
}

impl BinanceConnector {
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            listen_key: None,
            transport: WsTransport::new(Exchange::Binance.as_str(), config),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Listen key of an already created user data stream.
    pub fn with_listen_key(mut self, listen_key: impl Into<String>) -> Self {
        self.listen_key = Some(listen_key.into());
        self
    }

    /// URL carrying every tracked stream, so a reconnect resubscribes.
    pub fn connection_url(&self, subscriptions: &SubscriptionSnapshot) -> String {
        let mut streams = stream_names(&subscriptions.pairs, BOOK_TICKER);
        if subscriptions.order_updates {
            if let Some(key) = &self.listen_key {
                streams.push(key.clone());
            }
        }
        build_stream_url(&self.ws_url, &join_streams(&streams))
    }

    fn subscribe_request(&self, streams: &[String]) -> Result<String, FeedError> {
        let request = StreamRequest {
            method: "SUBSCRIBE",
            params: streams,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        };
        Ok(serde_json::to_string(&request)?)
    }

    fn subscribe(&self, streams: &[String]) -> Result<(), FeedError> {
        let request = self.subscribe_request(streams)?;
        debug!("Binance: Subscribing to {}", streams.join(", "));
        self.transport.send(request)
    }

    /// Decode a combined-stream or raw frame.
    pub fn parse_frame(frame: &str) -> Result<Option<VenueUpdate>, FeedError> {
        let value: Value = serde_json::from_str(frame)?;

        if let Some(error) = value.get("error") {
            return Err(FeedError::SubscriptionFailed(error.to_string()));
        }
        if value.get("id").is_some() && value.get("result").is_some() {
            debug!("Binance: Request {} acknowledged", value["id"]);
            return Ok(None);
        }

        let data = value.get("data").unwrap_or(&value);
        match data.get("e").and_then(Value::as_str) {
            Some("executionReport") => {
                let report = BinanceExecutionReport::deserialize(data)?;
                Ok(Some(report.into_update()?.into()))
            }
            // Account and balance events carry nothing we publish
            Some(_) => Ok(None),
            None if data.get("b").is_some() && data.get("a").is_some() => {
                let ticker = BinanceBookTicker::deserialize(data)?;
                Ok(Some(ticker.into_update()?.into()))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VenueConnector for BinanceConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn do_connect(
        &self,
        listener: Arc<dyn TransportListener>,
        subscriptions: &SubscriptionSnapshot,
    ) -> Result<(), FeedError> {
        let url = self.connection_url(subscriptions);
        self.transport.open(&url, listener)
    }

    async fn do_disconnect(&self) -> Result<(), FeedError> {
        self.transport.close();
        Ok(())
    }

    async fn do_subscribe_to_price(&self, pair: &str) -> Result<(), FeedError> {
        self.subscribe(&stream_names([pair], BOOK_TICKER))
    }

    async fn do_subscribe_to_order_updates(&self) -> Result<(), FeedError> {
        let key = self.listen_key.clone().ok_or_else(|| {
            FeedError::SubscriptionFailed("no listen key configured for the user data stream".to_string())
        })?;
        self.subscribe(&[key])
    }

    fn decode_frame(&self, frame: &str) -> Result<Option<VenueUpdate>, FeedError> {
        Self::parse_frame(frame)
    }
}
