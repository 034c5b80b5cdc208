//! Chat value types carried on the wire.

use serde::{Deserialize, Serialize};

/// A room identifier.
///
/// Any string is a valid room id; unknown ids name rooms that do not exist
/// yet and are created on first reference.
pub type RoomId = String;

/// Sender descriptor attached to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Stable identifier of the sender.
    pub id: String,
    /// Name shown to other participants.
    pub display_name: String,
}

impl UserRef {
    /// Create a new sender descriptor.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Send-time-derived identifier with millisecond precision.
    pub id: String,
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Who sent it.
    pub sender: UserRef,
    /// Message body.
    pub text: String,
    /// Send time, seconds since the Unix epoch.
    pub sent_at_unix: i64,
}

/// An event pushed to the subscribers of a room stream.
///
/// Messages are the only event kind today; the tag leaves room for others
/// (presence, typing) without a wire break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StreamEnvelope {
    /// A message was delivered to the room.
    #[serde(rename = "message")]
    Message {
        /// The delivered message.
        message: ChatMessage,
    },
}

impl StreamEnvelope {
    /// Wrap a delivered message.
    #[must_use]
    pub fn message(message: ChatMessage) -> Self {
        StreamEnvelope::Message { message }
    }
}
