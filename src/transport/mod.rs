//! Transport abstraction.
//!
//! The session never talks to a socket directly. A [`TransportFactory`]
//! opens one [`Transport`] per connection attempt and is handed a
//! [`TransportEvents`] sink through which the transport reports `open`,
//! `error`, `message` and `close`.
//!
//! ```text
//!   Session ──connect(url, events)──► TransportFactory
//!      ▲                                    │
//!      │                                    ▼
//!      └──── (generation, TransportEvent) ── Transport  ──send(text)──► wire
//! ```
//!
//! Every event is stamped with the generation of the attempt that produced
//! it, so a superseded transport can keep emitting without affecting the
//! session.
//!
//! A transport must deliver exactly one `Close` per connection attempt,
//! including when the handshake fails.

pub mod websocket;

use tokio::sync::mpsc;

pub use websocket::WebSocketFactory;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established and ready to send.
    Open,
    /// A transport-level error. A `Close` always follows when the error is
    /// fatal.
    Error(String),
    /// A text frame arrived.
    Message(String),
    /// The connection ended (or never started).
    Close {
        /// WebSocket close code (1000 = normal, 1006 = abnormal).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Sink for the events of one connection attempt.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Connection attempt this sink belongs to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Silently dropped if the session is gone.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.generation, event));
    }

    /// Report that the connection is open.
    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    /// Report a transport error.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error(message.into()));
    }

    /// Report an inbound text frame.
    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Report that the connection closed.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.emit(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }
}

/// One connection attempt.
pub trait Transport {
    /// Queue a text frame for sending.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer send.
    fn send(&self, text: &str) -> anyhow::Result<()>;

    /// Begin closing. The transport reports `Close` when done.
    fn close(&self);
}

/// Opens transports for a session.
pub trait TransportFactory {
    /// Start connecting to `url`, reporting progress through `events`.
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str, TransportEvents) -> Box<dyn Transport>,
{
    fn connect(&self, url: &str, events: TransportEvents) -> Box<dyn Transport> {
        self(url, events)
    }
}
