//! Fan-out of decoded updates to whoever is listening.

use crate::{ConnectionEvent, MarketEvent};
use compact_str::CompactString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use venuelink_core::{OrderUpdate, PriceUpdate};

pub type EventReceiver = broadcast::Receiver<MarketEvent>;

/// Broadcasts market and connection events without knowing the consumers.
///
/// Publishing never blocks; slow receivers lag and lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<MarketEvent>,
    undelivered: Arc<AtomicU64>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            undelivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Events dropped because nobody was subscribed.
    pub fn undelivered_count(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }

    pub fn publish_price_update(&self, source: &str, update: PriceUpdate, exchange_label: &str) {
        self.publish(MarketEvent::Price {
            source: CompactString::new(source),
            exchange_label: CompactString::new(exchange_label),
            update,
        });
    }

    pub fn publish_order_update(&self, source: &str, update: OrderUpdate, exchange_label: &str) {
        self.publish(MarketEvent::Order {
            source: CompactString::new(source),
            exchange_label: CompactString::new(exchange_label),
            update,
        });
    }

    pub fn publish_connection_event(&self, event: ConnectionEvent) {
        self.publish(event.into());
    }

    fn publish(&self, event: MarketEvent) {
        if self.tx.send(event).is_err() {
            let dropped = self.undelivered.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 1000 == 1 {
                debug!("No event subscribers, {} event(s) undelivered", dropped);
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
