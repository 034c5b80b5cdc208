//! The service façade: send, history, and stream over rooms.
//!
//! This is the surface the transport layer calls into. It translates call
//! shapes into hub/room operations and drives outbound event delivery for
//! stream calls.

use crate::hub::Hub;
use crate::message::{self, RoomEvent};
use crate::room::Fanout;
use async_trait::async_trait;
use relay_protocol::{ChatMessage, UserRef};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Terminal failure pushing an event to the remote peer.
#[derive(Debug, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Outbound side of one stream call.
///
/// The transport implements this over its connection. A failed push is
/// terminal for the stream call; the façade does not retry.
#[async_trait]
pub trait EventSink: Send {
    /// Push one event toward the remote peer.
    async fn deliver(&mut self, event: RoomEvent) -> Result<(), DeliveryError>;
}

/// The chat service façade.
///
/// One instance serves every connection; per-room state lives behind the
/// hub, which is constructed explicitly at startup and passed in.
#[derive(Debug, Clone)]
pub struct ChatService {
    hub: Arc<Hub>,
}

impl ChatService {
    /// Create a service over an existing hub.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Registry backing this service.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Append a message to `room_id` and fan it out to live subscribers.
    ///
    /// The room id is taken as-is; an unseen id creates its room. Returns
    /// the minted message and the fan-out outcome. Cannot fail.
    pub fn send(
        &self,
        room_id: &str,
        text: impl Into<String>,
        sender: UserRef,
    ) -> (Arc<ChatMessage>, Fanout) {
        let room = self.hub.get_or_create(room_id);
        let msg = Arc::new(message::mint(room_id, text, sender));
        let fanout = room.append(Arc::clone(&msg));
        (msg, fanout)
    }

    /// Get the last `limit` messages of `room_id`, oldest first.
    ///
    /// Read-only; a non-positive `limit` returns everything retained.
    #[must_use]
    pub fn history(&self, room_id: &str, limit: i64) -> Vec<Arc<ChatMessage>> {
        self.hub.get_or_create(room_id).snapshot(limit)
    }

    /// Serve one stream call over `room_id`.
    ///
    /// Registers a sink, replays up to `limit` history entries into
    /// `outbound` in order, then delivers live events in arrival order.
    /// Returns `Err` when an outbound push fails; caller cancellation is
    /// dropping the returned future. On every exit path - return, push
    /// failure, or cancellation - the sink is unregistered exactly once by
    /// the subscription guard.
    pub async fn stream<S: EventSink>(
        &self,
        room_id: &str,
        limit: i64,
        outbound: &mut S,
    ) -> Result<(), DeliveryError> {
        let room = self.hub.get_or_create(room_id);
        let (mut sub, replay) = room.subscribe(limit);

        debug!(
            room = %room_id,
            sink = sub.sink_id(),
            replay = replay.len(),
            "stream open"
        );

        for msg in replay {
            outbound.deliver(RoomEvent::Message(msg)).await?;
        }

        while let Some(event) = sub.recv().await {
            outbound.deliver(event).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ForwardSink(mpsc::UnboundedSender<RoomEvent>);

    #[async_trait]
    impl EventSink for ForwardSink {
        async fn deliver(&mut self, event: RoomEvent) -> Result<(), DeliveryError> {
            self.0
                .send(event)
                .map_err(|_| DeliveryError("peer gone".into()))
        }
    }

    struct RefusingSink;

    #[async_trait]
    impl EventSink for RefusingSink {
        async fn deliver(&mut self, _event: RoomEvent) -> Result<(), DeliveryError> {
            Err(DeliveryError("connection reset".into()))
        }
    }

    fn service() -> ChatService {
        ChatService::new(Arc::new(Hub::new()))
    }

    fn user() -> UserRef {
        UserRef::new("conn_1", "alice")
    }

    fn text(event: &RoomEvent) -> String {
        let RoomEvent::Message(msg) = event;
        msg.text.clone()
    }

    #[test]
    fn test_send_then_history() {
        let svc = service();

        let (sent, fanout) = svc.send("room1", "hi", user());
        assert_eq!(sent.text, "hi");
        assert_eq!(sent.room_id, "room1");
        assert_eq!(fanout, Fanout::default());

        let hist = svc.history("room1", 0);
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].text, "hi");
    }

    #[test]
    fn test_history_of_unseen_room_is_empty() {
        let svc = service();

        assert!(svc.history("ghost", 0).is_empty());
        assert_eq!(svc.hub().room_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_sees_live_events_in_order() {
        let svc = service();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stream_svc = svc.clone();
        let task = tokio::spawn(async move {
            let mut sink = ForwardSink(tx);
            stream_svc.stream("room1", 0, &mut sink).await
        });

        let room = svc.hub().get_or_create("room1");
        while room.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        svc.send("room1", "a", user());
        svc.send("room1", "b", user());

        assert_eq!(text(&rx.recv().await.unwrap()), "a");
        assert_eq!(text(&rx.recv().await.unwrap()), "b");
        assert!(rx.try_recv().is_err());

        task.abort();
        let _ = task.await;
        assert_eq!(room.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_replays_tail_before_live() {
        let svc = service();
        for i in 1..=5 {
            svc.send("room1", format!("t{i}"), user());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream_svc = svc.clone();
        let task = tokio::spawn(async move {
            let mut sink = ForwardSink(tx);
            stream_svc.stream("room1", 3, &mut sink).await
        });

        let room = svc.hub().get_or_create("room1");
        while room.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        svc.send("room1", "t6", user());

        for expected in ["t3", "t4", "t5", "t6"] {
            assert_eq!(text(&rx.recv().await.unwrap()), expected);
        }

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_stream_delivery_failure_is_terminal_and_cleans_up() {
        let svc = service();
        svc.send("room1", "t1", user());

        let err = svc
            .stream("room1", 1, &mut RefusingSink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));

        let room = svc.hub().get_or_create("room1");
        assert_eq!(room.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_stream_unregisters_sink() {
        let svc = service();
        let (tx, _rx) = mpsc::unbounded_channel();

        let stream_svc = svc.clone();
        let task = tokio::spawn(async move {
            let mut sink = ForwardSink(tx);
            stream_svc.stream("room1", 0, &mut sink).await
        });

        let room = svc.hub().get_or_create("room1");
        while room.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        task.abort();
        let _ = task.await;
        assert_eq!(room.subscriber_count(), 0);
    }
}
