//! In-memory connector used by the adapter tests.

use crate::{FeedError, SubscriptionSnapshot, TransportListener, VenueConnector, VenueUpdate};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use venuelink_core::{Exchange, PriceUpdate};

/// Records hook calls and lets a test drive the transport callbacks.
///
/// Frames of the form `price:SYMBOL:BID:ASK` decode to price updates,
/// `garbage` fails to decode, anything else is a control frame.
#[derive(Default)]
pub struct MockConnector {
    calls: Mutex<Vec<String>>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    last_subscriptions: Mutex<SubscriptionSnapshot>,
    fail_connects: AtomicBool,
    fail_subscriptions: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn connect_count(&self) -> usize {
        self.count("connect")
    }

    pub fn disconnect_count(&self) -> usize {
        self.count("disconnect")
    }

    pub fn order_subscription_count(&self) -> usize {
        self.count("orders")
    }

    pub fn price_subscriptions(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| call.strip_prefix("subscribe:").map(str::to_string))
            .collect()
    }

    pub fn last_subscriptions(&self) -> SubscriptionSnapshot {
        self.last_subscriptions.lock().unwrap().clone()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    /// Listener handed to the most recent `do_connect`.
    pub fn listener(&self) -> Arc<dyn TransportListener> {
        self.listener
            .lock()
            .unwrap()
            .clone()
            .expect("do_connect was never called")
    }

    pub fn open(&self) {
        self.listener().on_open();
    }

    pub fn frame(&self, frame: &str) {
        self.listener().on_frame(frame);
    }

    pub fn close(&self, code: u16, reason: &str) {
        let listener = self.listener();
        listener.on_closing(code, reason);
        listener.on_closed(code, reason);
    }

    pub fn fail(&self, error: FeedError) {
        self.listener().on_failure(error);
    }
}

#[async_trait]
impl VenueConnector for MockConnector {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    async fn do_connect(
        &self,
        listener: Arc<dyn TransportListener>,
        subscriptions: &SubscriptionSnapshot,
    ) -> Result<(), FeedError> {
        self.calls.lock().unwrap().push("connect".to_string());
        *self.last_subscriptions.lock().unwrap() = subscriptions.clone();
        *self.listener.lock().unwrap() = Some(listener);
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(FeedError::ConnectionFailed("connection refused".to_string()));
        }
        Ok(())
    }

    async fn do_disconnect(&self) -> Result<(), FeedError> {
        self.calls.lock().unwrap().push("disconnect".to_string());
        Ok(())
    }

    async fn do_subscribe_to_price(&self, pair: &str) -> Result<(), FeedError> {
        self.calls.lock().unwrap().push(format!("subscribe:{}", pair));
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(FeedError::SubscriptionFailed(pair.to_string()));
        }
        Ok(())
    }

    async fn do_subscribe_to_order_updates(&self) -> Result<(), FeedError> {
        self.calls.lock().unwrap().push("orders".to_string());
        Ok(())
    }

    fn decode_frame(&self, frame: &str) -> Result<Option<VenueUpdate>, FeedError> {
        if frame == "garbage" {
            return Err(FeedError::ParseError(frame.to_string()));
        }
        let Some(rest) = frame.strip_prefix("price:") else {
            return Ok(None);
        };
        let parts: Vec<&str> = rest.split(':').collect();
        let [symbol, bid, ask] = parts.as_slice() else {
            return Err(FeedError::ParseError(frame.to_string()));
        };
        let bid: f64 = bid.parse().map_err(|_| FeedError::ParseError(frame.to_string()))?;
        let ask: f64 = ask.parse().map_err(|_| FeedError::ParseError(frame.to_string()))?;
        Ok(Some(
            PriceUpdate::new(Exchange::Binance, symbol, bid, ask, 1.0, 1.0).into(),
        ))
    }
}
