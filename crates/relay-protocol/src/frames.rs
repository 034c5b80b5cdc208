//! Frame types for the relay wire protocol.
//!
//! Frames are the unit of exchange between clients and the server. Client
//! requests carry an `id` the server echoes in its reply; `Event` frames are
//! server-initiated pushes on an open stream and carry no request id.

use crate::types::{ChatMessage, StreamEnvelope};
use serde::{Deserialize, Serialize};

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Send a message to a room.
    #[serde(rename = "send")]
    Send {
        /// Request id echoed in the `Sent` reply.
        id: u64,
        /// Target room.
        room: String,
        /// Message body.
        text: String,
        /// Optional display name for the sender descriptor.
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },

    /// Fetch the recent history of a room.
    #[serde(rename = "history")]
    History {
        /// Request id echoed in the `Messages` reply.
        id: u64,
        /// Target room.
        room: String,
        /// Maximum entries to return; zero or negative means all retained.
        limit: i64,
    },

    /// Open a live stream over a room, replaying up to `limit` entries first.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request id echoed in the `Ack` reply.
        id: u64,
        /// Target room.
        room: String,
        /// History entries to replay before live delivery begins.
        limit: i64,
    },

    /// Close a previously opened stream over a room.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request id echoed in the `Ack` reply.
        id: u64,
        /// Target room.
        room: String,
    },

    /// Reply to `Send`, carrying the message as stored.
    #[serde(rename = "sent")]
    Sent {
        /// Id of the `Send` request.
        id: u64,
        /// The stored message.
        message: ChatMessage,
    },

    /// Reply to `History`.
    #[serde(rename = "messages")]
    Messages {
        /// Id of the `History` request.
        id: u64,
        /// Retained messages, oldest first.
        messages: Vec<ChatMessage>,
    },

    /// Server push on an open stream: replayed entries first, then live.
    #[serde(rename = "event")]
    Event {
        /// Room the stream is over.
        room: String,
        /// The pushed event.
        envelope: StreamEnvelope,
    },

    /// Positive acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// Id of the acknowledged request.
        id: u64,
    },

    /// Error reply (id 0 when not tied to a request).
    #[serde(rename = "error")]
    Error {
        /// Id of the failed request.
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp echoed by the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Short frame kind name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Send { .. } => "send",
            Frame::History { .. } => "history",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::Sent { .. } => "sent",
            Frame::Messages { .. } => "messages",
            Frame::Event { .. } => "event",
            Frame::Ack { .. } => "ack",
            Frame::Error { .. } => "error",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }

    /// Create a new `Send` frame.
    #[must_use]
    pub fn send(id: u64, room: impl Into<String>, text: impl Into<String>, from: Option<String>) -> Self {
        Frame::Send {
            id,
            room: room.into(),
            text: text.into(),
            from,
        }
    }

    /// Create a new `History` frame.
    #[must_use]
    pub fn history(id: u64, room: impl Into<String>, limit: i64) -> Self {
        Frame::History {
            id,
            room: room.into(),
            limit,
        }
    }

    /// Create a new `Subscribe` frame.
    #[must_use]
    pub fn subscribe(id: u64, room: impl Into<String>, limit: i64) -> Self {
        Frame::Subscribe {
            id,
            room: room.into(),
            limit,
        }
    }

    /// Create a new `Unsubscribe` frame.
    #[must_use]
    pub fn unsubscribe(id: u64, room: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            room: room.into(),
        }
    }

    /// Create a new `Event` push for a room.
    #[must_use]
    pub fn event(room: impl Into<String>, envelope: StreamEnvelope) -> Self {
        Frame::Event {
            room: room.into(),
            envelope,
        }
    }

    /// Create a new `Ack` frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new `Error` frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new `Pong` frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
