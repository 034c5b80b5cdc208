//! Room state: bounded message history plus live subscriber sinks.
//!
//! A room's history and sink set are only ever touched under the room's one
//! lock, so appends, subscriptions and removals never interleave their
//! effects. Fan-out is non-blocking per sink: a full delivery buffer drops
//! the event for that sink instead of stalling the sender or its peers.

use crate::message::RoomEvent;
use relay_protocol::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Most recent messages retained per room.
pub const HISTORY_LIMIT: usize = 200;

/// Delivery buffer capacity of one subscriber sink.
pub const SINK_CAPACITY: usize = 64;

/// Sink ids are process-unique so re-registrations never collide.
static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Fan-out outcome of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fanout {
    /// Sinks that accepted the event.
    pub delivered: usize,
    /// Sinks whose buffer was full; the event was dropped for them.
    pub dropped: usize,
}

#[derive(Debug, Default)]
struct RoomState {
    history: VecDeque<Arc<ChatMessage>>,
    sinks: HashMap<u64, mpsc::Sender<RoomEvent>>,
}

/// One room's message history and live subscribers.
#[derive(Debug)]
pub struct Room {
    name: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RoomState::default()),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message to the history and fan it out to every registered
    /// sink.
    ///
    /// History past [`HISTORY_LIMIT`] is evicted oldest-first before the
    /// fan-out, so every delivered message is already retained. Pushes are
    /// `try_send` against each sink's bounded buffer; slow subscribers lose
    /// the event rather than blocking anyone.
    pub fn append(&self, msg: Arc<ChatMessage>) -> Fanout {
        let mut state = self.lock();

        state.history.push_back(Arc::clone(&msg));
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }

        let event = RoomEvent::Message(msg);
        let mut fanout = Fanout::default();
        for sink in state.sinks.values() {
            match sink.try_send(event.clone()) {
                Ok(()) => fanout.delivered += 1,
                Err(_) => fanout.dropped += 1,
            }
        }

        trace!(
            room = %self.name,
            delivered = fanout.delivered,
            dropped = fanout.dropped,
            "fan-out"
        );

        fanout
    }

    /// Get the last `limit` retained messages, oldest first.
    ///
    /// A non-positive or oversized `limit` returns everything retained.
    #[must_use]
    pub fn snapshot(&self, limit: i64) -> Vec<Arc<ChatMessage>> {
        tail(&self.lock().history, limit)
    }

    /// Register a new sink and read its replay tail.
    ///
    /// Registration and the replay read share one critical section, so no
    /// message appended after registration is missed and none of the
    /// replayed ones is delivered again as a live event.
    pub fn subscribe(self: Arc<Self>, replay_limit: i64) -> (Subscription, Vec<Arc<ChatMessage>>) {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let id = NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed);

        let replay = {
            let mut state = self.lock();
            state.sinks.insert(id, tx);
            let replay = tail(&state.history, replay_limit);
            debug!(
                room = %self.name,
                sink = id,
                subscribers = state.sinks.len(),
                "subscribed"
            );
            replay
        };

        (
            Subscription {
                id,
                room: self,
                rx,
            },
            replay,
        )
    }

    /// Remove a sink and close its channel. Safe against concurrent fan-out
    /// and safe to call for an id that was already removed.
    fn remove_sink(&self, id: u64) {
        if self.lock().sinks.remove(&id).is_some() {
            debug!(room = %self.name, sink = id, "unsubscribed");
        }
    }

    /// Number of live subscriber sinks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().sinks.len()
    }

    /// Number of retained history entries.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        // Critical sections are short and panic-free.
        self.state.lock().expect("room lock poisoned")
    }
}

fn tail(history: &VecDeque<Arc<ChatMessage>>, limit: i64) -> Vec<Arc<ChatMessage>> {
    let len = history.len();
    let take = if limit <= 0 {
        len
    } else {
        (limit as usize).min(len)
    };
    history.iter().skip(len - take).cloned().collect()
}

/// A live subscriber's end of its sink.
///
/// Dropping the subscription unregisters and closes the sink, so every exit
/// path of a stream call cleans up exactly once.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    room: Arc<Room>,
    rx: mpsc::Receiver<RoomEvent>,
}

impl Subscription {
    /// Receive the next fanned-out event.
    pub async fn recv(&mut self) -> Option<RoomEvent> {
        self.rx.recv().await
    }

    /// Id of the underlying sink.
    #[must_use]
    pub fn sink_id(&self) -> u64 {
        self.id
    }

    /// Room this subscription is registered with.
    #[must_use]
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.room.remove_sink(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::mint;
    use relay_protocol::UserRef;

    fn msg(text: &str) -> Arc<ChatMessage> {
        Arc::new(mint("room1", text, UserRef::new("c1", "c1")))
    }

    fn event_text(event: &RoomEvent) -> String {
        let RoomEvent::Message(msg) = event;
        msg.text.clone()
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let room = Room::new("room1");

        for i in 1..=205 {
            room.append(msg(&format!("t{i}")));
        }

        assert_eq!(room.history_len(), HISTORY_LIMIT);

        let all = room.snapshot(0);
        assert_eq!(all.len(), HISTORY_LIMIT);
        assert_eq!(all[0].text, "t6");
        assert_eq!(all[HISTORY_LIMIT - 1].text, "t205");
    }

    #[test]
    fn test_snapshot_limits() {
        let room = Room::new("room1");
        for i in 1..=5 {
            room.append(msg(&format!("t{i}")));
        }

        let last3 = room.snapshot(3);
        assert_eq!(last3.len(), 3);
        assert_eq!(last3[0].text, "t3");
        assert_eq!(last3[2].text, "t5");

        assert_eq!(room.snapshot(0).len(), 5);
        assert_eq!(room.snapshot(-1).len(), 5);
        assert_eq!(room.snapshot(10).len(), 5);
    }

    #[tokio::test]
    async fn test_subscribe_receives_appends_in_order() {
        let room = Arc::new(Room::new("room1"));
        let (mut sub, replay) = Arc::clone(&room).subscribe(0);
        assert!(replay.is_empty());

        room.append(msg("a"));
        room.append(msg("b"));

        assert_eq!(event_text(&sub.recv().await.unwrap()), "a");
        assert_eq!(event_text(&sub.recv().await.unwrap()), "b");
    }

    #[tokio::test]
    async fn test_replay_tail_then_live_without_duplicates() {
        let room = Arc::new(Room::new("room1"));
        for i in 1..=5 {
            room.append(msg(&format!("t{i}")));
        }

        let (mut sub, replay) = Arc::clone(&room).subscribe(3);
        let replayed: Vec<_> = replay.iter().map(|m| m.text.clone()).collect();
        assert_eq!(replayed, ["t3", "t4", "t5"]);

        room.append(msg("t6"));
        assert_eq!(event_text(&sub.recv().await.unwrap()), "t6");
    }

    #[tokio::test]
    async fn test_full_sink_drops_silently() {
        let room = Arc::new(Room::new("room1"));
        let (mut sub, _) = Arc::clone(&room).subscribe(0);

        for i in 0..SINK_CAPACITY {
            let fanout = room.append(msg(&format!("m{i}")));
            assert_eq!(fanout, Fanout { delivered: 1, dropped: 0 });
        }

        // Buffer is full now; the next append loses this sink.
        let fanout = room.append(msg("overflow"));
        assert_eq!(fanout, Fanout { delivered: 0, dropped: 1 });

        for i in 0..SINK_CAPACITY {
            assert_eq!(event_text(&sub.recv().await.unwrap()), format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_affect_peers() {
        let room = Arc::new(Room::new("room1"));
        let (_slow, _) = Arc::clone(&room).subscribe(0);
        let (mut live, _) = Arc::clone(&room).subscribe(0);

        // The slow sink never drains; the live one keeps up.
        for i in 0..SINK_CAPACITY {
            room.append(msg(&format!("m{i}")));
            assert_eq!(event_text(&live.recv().await.unwrap()), format!("m{i}"));
        }

        let fanout = room.append(msg("last"));
        assert_eq!(fanout, Fanout { delivered: 1, dropped: 1 });
        assert_eq!(event_text(&live.recv().await.unwrap()), "last");
    }

    #[tokio::test]
    async fn test_drop_unregisters_sink() {
        let room = Arc::new(Room::new("room1"));
        let (sub, _) = Arc::clone(&room).subscribe(0);
        assert_eq!(room.subscriber_count(), 1);

        drop(sub);
        assert_eq!(room.subscriber_count(), 0);

        let fanout = room.append(msg("nobody home"));
        assert_eq!(fanout, Fanout::default());
    }

    #[test]
    fn test_remove_sink_idempotent() {
        let room = Arc::new(Room::new("room1"));
        let (sub, _) = Arc::clone(&room).subscribe(0);
        let id = sub.sink_id();

        room.remove_sink(id);
        room.remove_sink(id);
        assert_eq!(room.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sink_ids_are_unique() {
        let room = Arc::new(Room::new("room1"));
        let (first, _) = Arc::clone(&room).subscribe(0);
        let (second, _) = Arc::clone(&room).subscribe(0);

        assert_ne!(first.sink_id(), second.sink_id());
        assert_eq!(room.subscriber_count(), 2);
    }
}
