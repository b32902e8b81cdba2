//! Wire protocol: JSON array envelopes with a numeric tag at index 0.
//!
//! # Outbound
//!
//! ```text
//! [0, topic, action, args, params?]             notify
//! [1, channel, topic, action, args, params?]    call
//! [2, channel, topic, params?]                  subscribe
//! [3, channel]                                  unsubscribe
//! ```
//!
//! # Inbound
//!
//! ```text
//! [0, channel, error]            error (call or subscription)
//! [1, channel, value]            call result
//! [2, channel, value]            topic reset
//! [3, channel, [update, ...]]    patch batch
//! [4, aliased, target]           channel alias
//! ```
//!
//! `params` is a flat string map and is omitted when empty.

use std::fmt;

use serde_json::json;

use crate::topic::Topic;
use crate::updates::Update;
use crate::value::Value;

/// Numeric id of one call or one live subscription.
pub type ChannelId = u64;

/// A frame sent from the client to the server.
#[derive(Debug, Clone, Copy)]
pub enum Outbound<'a> {
    /// Fire-and-forget action.
    Notify {
        /// Target topic.
        topic: &'a Topic,
        /// Action name.
        action: &'a str,
        /// Positional arguments.
        args: &'a [serde_json::Value],
    },
    /// Action with a reply on `channel`.
    Call {
        /// Channel the result or error will arrive on.
        channel: ChannelId,
        /// Target topic.
        topic: &'a Topic,
        /// Action name.
        action: &'a str,
        /// Positional arguments.
        args: &'a [serde_json::Value],
    },
    /// Start a subscription on `channel`.
    Subscribe {
        /// Channel the subscription will live on.
        channel: ChannelId,
        /// Topic to subscribe to.
        topic: &'a Topic,
    },
    /// End the subscription on `channel`.
    Unsubscribe {
        /// Channel to release.
        channel: ChannelId,
    },
}

impl Outbound<'_> {
    /// Encode as a JSON text frame.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut frame = match *self {
            Self::Notify { topic, action, args } => {
                vec![json!(0), topic.segments_json(), json!(action), json!(args)]
            }
            Self::Call {
                channel,
                topic,
                action,
                args,
            } => vec![
                json!(1),
                json!(channel),
                topic.segments_json(),
                json!(action),
                json!(args),
            ],
            Self::Subscribe { channel, topic } => {
                vec![json!(2), json!(channel), topic.segments_json()]
            }
            Self::Unsubscribe { channel } => vec![json!(3), json!(channel)],
        };

        let topic = match *self {
            Self::Notify { topic, .. } | Self::Call { topic, .. } | Self::Subscribe { topic, .. } => {
                Some(topic)
            }
            Self::Unsubscribe { .. } => None,
        };
        if let Some(params) = topic.and_then(Topic::params_json) {
            frame.push(params);
        }

        serde_json::Value::Array(frame).to_string()
    }
}

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Server-reported failure for a call or subscription.
    Error {
        /// Channel the error is addressed to.
        channel: ChannelId,
        /// Error payload, passed through untouched.
        error: serde_json::Value,
    },
    /// Successful call result.
    Result {
        /// Channel of the call.
        channel: ChannelId,
        /// Result payload.
        value: serde_json::Value,
    },
    /// Full replacement of a subscription's value.
    Reset {
        /// Subscription channel.
        channel: ChannelId,
        /// New baseline value.
        value: Value,
    },
    /// Ordered batch of patches for a subscription.
    Updates {
        /// Subscription channel.
        channel: ChannelId,
        /// Patches to apply in order.
        updates: Vec<Update>,
    },
    /// The server merged `aliased` into `target`.
    Alias {
        /// Channel that no longer exists on the server.
        aliased: ChannelId,
        /// Surviving channel.
        target: ChannelId,
    },
}

/// An inbound frame could not be decoded.
#[derive(Debug)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    Json(serde_json::Error),
    /// The frame is JSON but does not have the expected shape.
    Malformed(String),
    /// Unknown frame tag.
    UnknownTag(u64),
    /// Unknown update operation tag.
    UnknownUpdate(u64),
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON frame: {e}"),
            Self::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            Self::UnknownTag(tag) => write!(f, "unknown frame tag {tag}"),
            Self::UnknownUpdate(tag) => write!(f, "unknown update operation {tag}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl Inbound {
    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Vec<serde_json::Value> = serde_json::from_str(text)?;
        let tag = frame
            .first()
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| ProtocolError::malformed("missing frame tag"))?;
        let channel_at = |i: usize| {
            frame
                .get(i)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| ProtocolError::malformed(format!("element {i} is not a channel id")))
        };
        let payload = || frame.get(2).cloned().unwrap_or_default();

        let inbound = match tag {
            0 => Self::Error {
                channel: channel_at(1)?,
                error: payload(),
            },
            1 => Self::Result {
                channel: channel_at(1)?,
                value: payload(),
            },
            2 => Self::Reset {
                channel: channel_at(1)?,
                value: Value::from(payload()),
            },
            3 => {
                let channel = channel_at(1)?;
                let updates = frame
                    .get(2)
                    .and_then(serde_json::Value::as_array)
                    .ok_or_else(|| ProtocolError::malformed("updates are not an array"))?
                    .iter()
                    .map(Update::from_wire)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::Updates { channel, updates }
            }
            4 => Self::Alias {
                aliased: channel_at(1)?,
                target: channel_at(2)?,
            },
            other => return Err(ProtocolError::UnknownTag(other)),
        };
        Ok(inbound)
    }

    /// Channel the frame is addressed to.
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Error { channel, .. }
            | Self::Result { channel, .. }
            | Self::Reset { channel, .. }
            | Self::Updates { channel, .. } => *channel,
            Self::Alias { aliased, .. } => *aliased,
        }
    }
}
