//! Construction of subscription-stream URLs.
//!
//! Venues such as Binance encode the subscribed streams in the connection
//! URL (`/stream?streams=btcusdt@bookTicker/ethusdt@bookTicker`). Building
//! the URL from the tracked subscriptions on every connect is what makes a
//! reconnection resubscribe automatically.

use crate::FeedError;
use url::Url;

const STREAMS_QUERY: &str = "?streams=";

/// Map http(s) to ws(s) and default a bare host to `wss://`.
pub fn normalize_scheme(base: &str) -> String {
    let base = base.trim();
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base.contains("://") {
        base.to_string()
    } else {
        format!("wss://{}", base)
    }
}

/// Build the connection URL for `streams` (a `/`-joined stream list).
///
/// - `...?streams=old` has its value replaced
/// - a path ending in `/stream` gets `?streams=<list>`
/// - a path already naming a stream (`.../btcusdt@trade`) is left alone
/// - anything else gets `streams=<list>` appended with `?` or `&`
///
/// An empty list leaves the (normalized) base untouched.
pub fn build_stream_url(base: &str, streams: &str) -> String {
    let base = normalize_scheme(base);
    if streams.is_empty() {
        return base;
    }

    if let Some(idx) = base.find(STREAMS_QUERY) {
        let value_start = idx + STREAMS_QUERY.len();
        let rest = &base[value_start..];
        let tail = rest.find('&').map(|i| &rest[i..]).unwrap_or("");
        return format!("{}{}{}", &base[..value_start], streams, tail);
    }

    let path = Url::parse(&base).map(|url| url.path().to_string()).ok();

    let is_combined_endpoint = path
        .as_deref()
        .is_some_and(|p| p.trim_end_matches('/').ends_with("/stream"));
    if is_combined_endpoint && !base.contains('?') {
        return format!("{}{}{}", base.trim_end_matches('/'), STREAMS_QUERY, streams);
    }

    let names_single_stream = match path.as_deref() {
        Some(p) => p.contains('@'),
        None => base.contains('@'),
    };
    if names_single_stream {
        return base;
    }

    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}streams={}", base, separator, streams)
}

/// `btcusdt@bookTicker`-style stream names for the given pairs.
pub fn stream_names<I, S>(pairs: I, channel: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|pair| format!("{}@{}", pair.as_ref().to_lowercase(), channel))
        .collect()
}

/// Join stream names into the `/`-separated list used in the query.
pub fn join_streams<S: AsRef<str>>(streams: &[S]) -> String {
    streams
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse a URL the transport is about to dial, requiring a ws/wss scheme.
pub fn validate_ws_url(raw: &str) -> Result<Url, FeedError> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FeedError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            other, raw
        ))),
    }
}
