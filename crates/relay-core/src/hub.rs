//! Room registry.

use crate::room::Room;
use dashmap::DashMap;
use relay_protocol::RoomId;
use std::sync::Arc;
use tracing::debug;

/// Registry mapping room ids to live rooms.
///
/// Rooms are created on first reference and live for the process lifetime;
/// there is no eviction. The registry's own locking is independent of any
/// room's lock: it is held only to hand out the `Arc<Room>`.
#[derive(Debug, Default)]
pub struct Hub {
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the room for `room_id`, creating it on first reference.
    ///
    /// Concurrent first references to the same id agree on one instance.
    #[must_use]
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        let entry = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room = %room_id, "creating room");
            Arc::new(Room::new(room_id))
        });
        Arc::clone(entry.value())
    }

    /// Number of rooms referenced so far.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
