//! VenueLink - headless venue connection daemon
//!
//! Keeps resilient WebSocket connections to trading venues and logs the
//! decoded price and order updates together with connection health.

mod config;

use clap::Parser;
use config::{AppConfig, VenueSettings};
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use venuelink_core::Exchange;
use venuelink_feeds::{
    BinanceConnector, ConnectionEvent, EventPublisher, EventReceiver, ExchangeAdapter, MarketEvent,
};

type BinanceAdapter = ExchangeAdapter<BinanceConnector>;

/// VenueLink CLI
#[derive(Parser, Debug)]
#[command(name = "venuelink")]
#[command(about = "Resilient exchange WebSocket connections", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Extra pairs to subscribe on Binance, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pairs: Vec<String>,

    /// Seconds between health reports
    #[arg(long)]
    health_interval: Option<u64>,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(builder.with_env_filter(EnvFilter::from_default_env()).finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn build_adapter(settings: &VenueSettings, publisher: &EventPublisher) -> Option<BinanceAdapter> {
    if settings.exchange != Exchange::Binance {
        warn!("{}: No connector available, skipping", settings.exchange);
        return None;
    }

    let config = settings.connector_config();
    let mut connector = BinanceConnector::new(&config);
    let listen_key = settings
        .listen_key
        .clone()
        .or_else(|| std::env::var("BINANCE_LISTEN_KEY").ok());
    if let Some(key) = listen_key {
        connector = connector.with_listen_key(key);
    } else if settings.order_updates {
        warn!("Binance: order updates requested but no listen key configured");
    }

    Some(ExchangeAdapter::new(connector, &config, publisher.clone()))
}

/// Subscribe configured pairs not yet tracked by the adapter.
async fn apply_subscriptions(adapter: &BinanceAdapter, settings: &VenueSettings) {
    let tracked = adapter.subscribed_pairs();
    for pair in &settings.pairs {
        if !tracked.contains(pair) {
            adapter.subscribe_to_price(pair).await;
        }
    }
    if settings.order_updates && !adapter.is_order_updates_subscribed() {
        adapter.subscribe_to_order_updates().await;
    }
}

async fn run_event_loop(mut events: EventReceiver, venues: Vec<(BinanceAdapter, VenueSettings)>) {
    info!("Starting event loop");
    let mut price_count = 0u64;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event loop lagged, {} event(s) skipped", skipped);
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match event {
            MarketEvent::Price { exchange_label, update, .. } => {
                price_count += 1;
                debug!(
                    "{} {}: bid {} ask {} (spread {:.8})",
                    exchange_label,
                    update.symbol,
                    update.bid,
                    update.ask,
                    update.spread()
                );
                if price_count % 10_000 == 0 {
                    info!("{} price updates received", price_count);
                }
            }
            MarketEvent::Order { exchange_label, update, .. } => {
                info!(
                    "{} order {} {} {:?} {:?}: {}/{} @ {}",
                    exchange_label,
                    update.order_id,
                    update.symbol,
                    update.side,
                    update.status,
                    update.filled_quantity,
                    update.quantity,
                    update.price
                );
            }
            MarketEvent::Connection(ConnectionEvent::Connected(exchange)) => {
                info!("{}: Connected", exchange);
                for (adapter, settings) in venues.iter().filter(|(a, _)| a.exchange() == exchange) {
                    apply_subscriptions(adapter, settings).await;
                }
            }
            MarketEvent::Connection(ConnectionEvent::Reconnecting(exchange, delay)) => {
                info!("{}: Reconnecting in {:?}", exchange, delay);
            }
            MarketEvent::Connection(ConnectionEvent::Disconnected(exchange)) => {
                info!("{}: Disconnected", exchange);
            }
            MarketEvent::Connection(ConnectionEvent::Failed(exchange, reason)) => {
                warn!("{}: Connection failed: {}", exchange, reason);
            }
            MarketEvent::Connection(ConnectionEvent::CircuitBreakerOpen(exchange, remaining)) => {
                warn!("{}: Circuit breaker open, retry in {:?}", exchange, remaining);
            }
        }
    }

    info!("Event loop stopped");
}

async fn run_health_loop(adapters: Vec<BinanceAdapter>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for adapter in &adapters {
            match serde_json::to_string(&adapter.health()) {
                Ok(json) => info!("Health {}: {}", adapter.exchange_name(), json),
                Err(e) => warn!("{}: Failed to serialize health: {}", adapter.exchange_name(), e),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(level) = args.log_level.clone() {
        config.log_level = level;
    }
    if let Some(secs) = args.health_interval {
        config.health_interval_secs = secs;
    }
    if !args.pairs.is_empty() {
        if let Some(binance) = config.venues.iter_mut().find(|v| v.exchange == Exchange::Binance) {
            for pair in &args.pairs {
                if !binance.pairs.contains(pair) {
                    binance.pairs.push(pair.clone());
                }
            }
        }
    }

    init_logging(&config.log_level);

    info!("VenueLink starting...");
    info!("  Config: {}", args.config);
    info!("  Health Interval: {}s", config.health_interval_secs);

    let buffer = config
        .enabled_venues()
        .map(|venue| venue.connector_config().event_buffer)
        .max()
        .unwrap_or(1_000);
    let publisher = EventPublisher::new(buffer);

    let venues: Vec<(BinanceAdapter, VenueSettings)> = config
        .enabled_venues()
        .filter_map(|settings| build_adapter(settings, &publisher).map(|adapter| (adapter, settings.clone())))
        .collect();

    if venues.is_empty() {
        error!("No venues to connect to");
        return;
    }
    for (adapter, settings) in &venues {
        info!("  {}: {} pair(s)", adapter.exchange_name(), settings.pairs.len());
    }

    let event_handle = tokio::spawn(run_event_loop(publisher.subscribe(), venues.clone()));
    let adapters: Vec<BinanceAdapter> = venues.iter().map(|(adapter, _)| adapter.clone()).collect();
    let health_handle = tokio::spawn(run_health_loop(
        adapters.clone(),
        Duration::from_secs(config.health_interval_secs.max(1)),
    ));

    for adapter in &adapters {
        adapter.connect().await;
    }

    info!("VenueLink running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    for adapter in &adapters {
        adapter.disconnect().await;
    }
    health_handle.abort();
    event_handle.abort();

    info!("Goodbye!");
}
