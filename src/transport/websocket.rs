//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each connection attempt runs on a dedicated OS thread that owns a
//! single-threaded tokio runtime. The thread reads frames from the socket and
//! pushes [`TransportEvent`](super::TransportEvent)s into the session's
//! channel; it takes outgoing frames from its own unbounded channel. The
//! session side never blocks on the socket.
//!
//! # Lifecycle
//!
//! ```text
//! connect ──ok──► Open ──► Message* ──► Close(code, reason)
//!    │
//!    └─err──► Error(reason) ──► Close(1006, "handshake failed")
//! ```

// Rust guideline compliant 2026-02

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Transport, TransportEvents, TransportFactory};

/// Close code reported when the connection ends without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Close code reported for a client-initiated close.
const NORMAL_CLOSE: u16 = 1000;

/// Opens [`WebSocketTransport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketFactory;

impl TransportFactory for WebSocketFactory {
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::spawn(normalize_url(url), events))
    }
}

/// Outgoing command for the connection thread.
#[derive(Debug)]
enum Outgoing {
    /// Send a UTF-8 text frame.
    Text(String),
    /// Send a close frame and stop.
    Close,
}

/// Handle to one WebSocket connection thread.
#[derive(Debug)]
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl WebSocketTransport {
    /// Spawn the connection thread for `url`.
    ///
    /// Thread creation failures are reported through `events` as an error
    /// followed by a close, like any other failed handshake.
    pub fn spawn(url: String, events: TransportEvents) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let thread_events = events.clone();
        let spawned = std::thread::Builder::new()
            .name("topical-ws".to_string())
            .spawn(move || run_connection_thread(&url, &thread_events, outgoing_rx));
        if let Err(e) = spawned {
            log::error!("[Transport] Failed to spawn WebSocket thread: {e}");
            events.error(format!("failed to spawn WebSocket thread: {e}"));
            events.close(ABNORMAL_CLOSE, "thread spawn failed");
        }
        Self { outgoing }
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, text: &str) -> Result<()> {
        self.outgoing
            .send(Outgoing::Text(text.to_string()))
            .map_err(|e| anyhow!("WebSocket connection thread has exited: {e}"))
    }

    fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert an HTTP(S) URL to the WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

fn run_connection_thread(
    url: &str,
    events: &TransportEvents,
    outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            events.error(format!("failed to create tokio runtime: {e}"));
            events.close(ABNORMAL_CLOSE, "runtime unavailable");
            return;
        }
    };

    rt.block_on(async {
        let (code, reason) = match run_connection(url, events, outgoing_rx).await {
            Ok(closed) => closed,
            Err(e) => {
                log::warn!("[Transport] {url}: {e:#}");
                events.error(format!("{e:#}"));
                (ABNORMAL_CLOSE, e.to_string())
            }
        };
        events.close(code, reason);
    });
}

/// Drive one connection until it closes. Returns the close code and reason.
async fn run_connection(
    url: &str,
    events: &TransportEvents,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<(u16, String)> {
    log::debug!("[Transport] Connecting to {url}");
    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("WebSocket handshake with {url} failed"))?;
    let (mut sink, mut stream) = stream.split();

    log::info!("[Transport] Connected to {url}");
    events.open();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    log::trace!("[Transport] <- {text}");
                    events.message(text);
                }
                Some(Ok(Message::Binary(data))) => {
                    log::warn!("[Transport] Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    log::info!("[Transport] Closed by server ({code})");
                    return Ok((code, reason));
                }
                // Pings are answered by tungstenite.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(e).context("WebSocket read failed"),
                None => return Ok((ABNORMAL_CLOSE, "stream ended".to_string())),
            },
            command = outgoing_rx.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    log::trace!("[Transport] -> {text}");
                    sink.send(Message::Text(text))
                        .await
                        .context("WebSocket send failed")?;
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok((NORMAL_CLOSE, "client requested close".to_string()));
                }
            },
        }
    }
}
