//! Message minting and the internal fan-out event.

use chrono::Utc;
use relay_protocol::{ChatMessage, RoomId, StreamEnvelope, UserRef};
use std::sync::Arc;

/// Layout of send-time-derived message ids, millisecond precision.
const MESSAGE_ID_FORMAT: &str = "%Y%m%d%H%M%S%.3f";

/// Mint a new message for `room_id` with a fresh send-time id.
///
/// Two sends landing in the same millisecond mint the same id; the id
/// layout is part of the message contract, so that precision limit stands
/// rather than being papered over with a counter.
#[must_use]
pub fn mint(room_id: impl Into<RoomId>, text: impl Into<String>, sender: UserRef) -> ChatMessage {
    ChatMessage {
        id: Utc::now().format(MESSAGE_ID_FORMAT).to_string(),
        room_id: room_id.into(),
        sender,
        text: text.into(),
        sent_at_unix: Utc::now().timestamp(),
    }
}

/// An event fanned out to a room's subscriber sinks.
///
/// Mirrors the wire [`StreamEnvelope`], but shares the message across sinks
/// instead of owning a copy per subscriber.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A message was appended to the room.
    Message(Arc<ChatMessage>),
}

impl RoomEvent {
    /// Convert to the wire envelope for delivery to a client.
    #[must_use]
    pub fn to_envelope(&self) -> StreamEnvelope {
        match self {
            RoomEvent::Message(msg) => StreamEnvelope::message((**msg).clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_fields() {
        let msg = mint("room1", "hi", UserRef::new("c1", "alice"));

        assert_eq!(msg.room_id, "room1");
        assert_eq!(msg.text, "hi");
        assert_eq!(msg.sender.display_name, "alice");
        assert!(msg.sent_at_unix > 1_700_000_000);
    }

    #[test]
    fn test_id_layout() {
        let msg = mint("room1", "hi", UserRef::new("c1", "c1"));

        // 14 calendar digits, a dot, 3 millisecond digits
        assert_eq!(msg.id.len(), 18);
        assert_eq!(msg.id.as_bytes()[14], b'.');
        assert!(msg
            .id
            .chars()
            .enumerate()
            .all(|(i, c)| i == 14 || c.is_ascii_digit()));
    }

    #[test]
    fn test_event_to_envelope() {
        let msg = Arc::new(mint("room1", "hi", UserRef::new("c1", "c1")));
        let event = RoomEvent::Message(Arc::clone(&msg));

        let StreamEnvelope::Message { message } = event.to_envelope();
        assert_eq!(message, *msg);
    }
}
