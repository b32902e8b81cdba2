//! Session error types.

use std::fmt;

/// Synchronous failure of a session API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A topic segment or parameter is undefined or empty.
    InvalidTopic(String),
    /// The session was closed with [`Session::close`](super::Session::close).
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTopic(reason) => write!(f, "invalid topic: {reason}"),
            Self::Closed => write!(f, "session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Why an `execute` call did not produce a result.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The session was not connected when the call was made; nothing was sent.
    NotConnected,
    /// The session was closed before the call settled.
    Closed,
    /// The connection dropped before a reply arrived.
    ConnectionLost,
    /// The server answered with an error payload.
    Remote(serde_json::Value),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Closed => write!(f, "session is closed"),
            Self::ConnectionLost => write!(f, "connection lost before the call settled"),
            Self::Remote(error) => write!(f, "server error: {error}"),
        }
    }
}

impl std::error::Error for CallError {}
