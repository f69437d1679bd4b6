//! WebSocket transport driving a [`TransportListener`].
//!
//! Each [`WsTransport::open`] spawns one session task that dials the URL,
//! pumps frames into the listener and answers pings. Sessions never retry on
//! their own; reconnection belongs to the adapter that owns the listener.

use crate::stream_url::validate_ws_url;
use crate::{ConnectorConfig, FeedError, TransportListener};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

#[derive(Debug)]
struct Session {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished() && !self.commands.is_closed()
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    connect_timeout: Duration,
    ping_interval: Duration,
    stale_timeout: Duration,
}

/// One WebSocket connection at a time, replaced on every `open`.
#[derive(Debug)]
pub struct WsTransport {
    label: String,
    timing: Timing,
    session: Mutex<Option<Session>>,
}

impl WsTransport {
    pub fn new(label: impl Into<String>, config: &ConnectorConfig) -> Self {
        Self {
            label: label.into(),
            timing: Timing {
                connect_timeout: config.connect_timeout(),
                ping_interval: config.ping_interval(),
                stale_timeout: config.stale_timeout(),
            },
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session for `url`. A previous session is dropped silently.
    ///
    /// Returns once the session task is spawned; the outcome of the
    /// handshake is reported through `listener`.
    pub fn open(&self, url: &str, listener: Arc<dyn TransportListener>) -> Result<(), FeedError> {
        let url = validate_ws_url(url)?;
        let (tx, rx) = mpsc::unbounded_channel();

        info!("{}: Opening WebSocket to {}", self.label, url);
        let handle = tokio::spawn(run_session(
            self.label.clone(),
            url.to_string(),
            listener,
            rx,
            self.timing,
        ));

        let previous = self.session().replace(Session {
            commands: tx,
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!("{}: Superseded previous WebSocket session", self.label);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.session().as_ref().is_some_and(Session::is_alive)
    }

    /// Queue a text frame on the current session.
    pub fn send(&self, text: impl Into<String>) -> Result<(), FeedError> {
        let guard = self.session();
        let session = guard.as_ref().ok_or(FeedError::NotConnected)?;
        session
            .commands
            .send(Command::Send(text.into()))
            .map_err(|_| FeedError::ChannelClosed)
    }

    /// Close the session with a normal closure. No listener callbacks follow,
    /// including for a session still in its handshake.
    pub fn close(&self) {
        let Some(session) = self.session().take() else {
            return;
        };
        // The task sends the close frame and exits on its own
        if session.commands.send(Command::Close).is_err() {
            debug!("{}: WebSocket session already finished", self.label);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session().take() {
            session.handle.abort();
        }
    }
}

async fn run_session(
    label: String,
    url: String,
    listener: Arc<dyn TransportListener>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    timing: Timing,
) {
    let mut queued = Vec::new();
    let handshake = timeout(timing.connect_timeout, connect_async(url.as_str()));
    tokio::pin!(handshake);

    let ws_stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(Ok((ws_stream, response))) => {
                    debug!("{}: Connected (status: {:?})", label, response.status());
                    break ws_stream;
                }
                Ok(Err(e)) => {
                    listener.on_failure(e.into());
                    return;
                }
                Err(_) => {
                    listener.on_failure(FeedError::Timeout(format!(
                        "connect to {} after {:?}",
                        url, timing.connect_timeout
                    )));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(text)) => queued.push(text),
                Some(Command::Close) | None => {
                    debug!("{}: WebSocket closed during handshake", label);
                    return;
                }
            },
        }
    };

    listener.on_open();
    let (mut write, mut read) = ws_stream.split();

    for text in queued {
        if let Err(e) = write.send(Message::Text(text)).await {
            error!("{}: Failed to send frame: {}", label, e);
            listener.on_failure(e.into());
            return;
        }
    }

    let mut ping_timer = interval_at(Instant::now() + timing.ping_interval, timing.ping_interval);
    let mut last_message_time = Instant::now();

    loop {
        // Silent disconnects leave the socket looking alive
        if last_message_time.elapsed() > timing.stale_timeout {
            warn!(
                "{}: No messages received for {:?}, dropping connection",
                label,
                last_message_time.elapsed()
            );
            listener.on_failure(FeedError::Disconnected(
                "Stale connection - no messages received".to_string(),
            ));
            return;
        }

        tokio::select! {
            msg = read.next() => {
                last_message_time = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => listener.on_frame(&text),
                    Some(Ok(Message::Binary(data))) => listener.on_frame(&String::from_utf8_lossy(&data)),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            error!("{}: Failed to send PONG: {}", label, e);
                            listener.on_failure(e.into());
                            return;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => debug!("{}: Received PONG", label),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        listener.on_closing(code, &reason);
                        let _ = write.close().await;
                        listener.on_closed(code, &reason);
                        return;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!("{}: WebSocket read error: {}", label, e);
                        listener.on_failure(e.into());
                        return;
                    }
                    None => {
                        warn!("{}: WebSocket stream ended", label);
                        listener.on_closed(ABNORMAL_CLOSURE, "stream ended");
                        return;
                    }
                }
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            error!("{}: Failed to send frame: {}", label, e);
                            listener.on_failure(e.into());
                            return;
                        }
                    }
                    Some(Command::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!("{}: Close frame not delivered: {}", label, e);
                        }
                        debug!("{}: WebSocket session closed", label);
                        return;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    error!("{}: Failed to send PING: {}", label, e);
                    listener.on_failure(e.into());
                    return;
                }
            }
        }
    }
}
