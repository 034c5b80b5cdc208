//! Connection handlers for the relay server.
//!
//! Each WebSocket connection multiplexes plain requests (send, history) and
//! any number of room streams. Stream events are funneled through one
//! per-connection outbound channel so pushes from different rooms never
//! interleave mid-frame.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use relay_core::{ChatService, DeliveryError, EventSink, Hub, RoomEvent};
use relay_protocol::{codec, Frame, UserRef};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat service façade.
    pub service: ChatService,
    /// Server configuration.
    pub config: Config,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState {
        service: ChatService::new(Arc::new(Hub::new())),
        config: config.clone(),
    });

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Outbound side of one room stream, funneling events into the
/// connection's merged channel.
struct ConnectionSink {
    room: String,
    outbound: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl EventSink for ConnectionSink {
    async fn deliver(&mut self, event: RoomEvent) -> Result<(), DeliveryError> {
        let frame = Frame::event(self.room.clone(), event.to_envelope());
        self.outbound
            .send(frame)
            .map_err(|_| DeliveryError("connection closed".into()))
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Active room streams, keyed by room id
    let mut streams: HashMap<String, tokio::task::JoinHandle<()>> = HashMap::new();

    // Merged outbound channel for stream events from all rooms
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

    // Message processing loop
    'conn: loop {
        tokio::select! {
            biased;

            // Push stream events to the client
            Some(frame) = outbound_rx.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(
                                connection = %connection_id,
                                bytes = data.len(),
                                "inbound message too large"
                            );
                            metrics::record_error("oversize");
                            let reply = Frame::error(0, 1001, "message too large");
                            if send_frame(&mut sender, &reply).await.is_err() {
                                break;
                            }
                            continue;
                        }

                        read_buffer.extend_from_slice(&data);

                        // Decode as many complete frames as the buffer holds
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    metrics::record_message(data.len(), "inbound");

                                    if let Err(e) = handle_frame(
                                        frame,
                                        &connection_id,
                                        &state,
                                        &mut sender,
                                        &mut streams,
                                        &outbound_tx,
                                    ).await {
                                        error!(connection = %connection_id, error = %e, "frame handling error");
                                        break 'conn;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "protocol error");
                                    metrics::record_error("protocol");
                                    let _ = send_frame(&mut sender, &Frame::error(0, 1002, e.to_string())).await;
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_) | Message::Text(_))) => {
                        // Frames travel as binary; nothing to do here
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: abort stream tasks; each task's subscription guard
    // unregisters its sink
    for (_, handle) in streams {
        handle.abort();
    }

    metrics::set_active_rooms(state.service.hub().room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame.
async fn handle_frame(
    frame: Frame,
    connection_id: &str,
    state: &Arc<AppState>,
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    streams: &mut HashMap<String, tokio::task::JoinHandle<()>>,
    outbound_tx: &mpsc::UnboundedSender<Frame>,
) -> Result<()> {
    match frame {
        Frame::Send {
            id,
            room,
            text,
            from,
        } => {
            let sender_ref = UserRef::new(
                connection_id,
                from.unwrap_or_else(|| connection_id.to_string()),
            );

            let (message, fanout) = state.service.send(&room, text, sender_ref);
            metrics::record_dropped_events(fanout.dropped);
            metrics::set_active_rooms(state.service.hub().room_count());

            debug!(
                connection = %connection_id,
                room = %room,
                recipients = fanout.delivered,
                "message sent"
            );

            send_frame(
                sender,
                &Frame::Sent {
                    id,
                    message: (*message).clone(),
                },
            )
            .await?;
        }

        Frame::History { id, room, limit } => {
            let messages = state
                .service
                .history(&room, limit)
                .iter()
                .map(|m| (**m).clone())
                .collect();

            send_frame(sender, &Frame::Messages { id, messages }).await?;
        }

        Frame::Subscribe { id, room, limit } => {
            debug!(connection = %connection_id, room = %room, "subscribe request");

            let response = if streams.contains_key(&room) {
                Frame::error(id, 1003, format!("already streaming room: {room}"))
            } else if streams.len() >= state.config.limits.max_streams_per_connection {
                Frame::error(id, 1004, "stream limit reached")
            } else {
                let service = state.service.clone();
                let mut sink = ConnectionSink {
                    room: room.clone(),
                    outbound: outbound_tx.clone(),
                };
                let stream_room = room.clone();
                let stream_conn = connection_id.to_string();
                let handle = tokio::spawn(async move {
                    if let Err(e) = service.stream(&stream_room, limit, &mut sink).await {
                        debug!(
                            connection = %stream_conn,
                            room = %stream_room,
                            error = %e,
                            "stream ended"
                        );
                    }
                });

                streams.insert(room, handle);
                metrics::record_stream();
                metrics::set_active_rooms(state.service.hub().room_count());
                Frame::ack(id)
            };

            send_frame(sender, &response).await?;
        }

        Frame::Unsubscribe { id, room } => {
            debug!(connection = %connection_id, room = %room, "unsubscribe request");

            let response = match streams.remove(&room) {
                Some(handle) => {
                    handle.abort();
                    Frame::ack(id)
                }
                None => Frame::error(id, 1005, format!("not streaming room: {room}")),
            };

            send_frame(sender, &response).await?;
        }

        Frame::Ping { timestamp } => {
            send_frame(sender, &Frame::pong(timestamp)).await?;
        }

        other => {
            warn!(
                connection = %connection_id,
                frame = other.kind(),
                "unexpected frame type"
            );
        }
    }

    Ok(())
}

/// Send a frame to the WebSocket.
async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<()> {
    let data = codec::encode(frame)?;
    metrics::record_message(data.len(), "outbound");
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{ChatMessage, StreamEnvelope};

    fn event(text: &str) -> RoomEvent {
        RoomEvent::Message(Arc::new(ChatMessage {
            id: "20250804120000.000".into(),
            room_id: "room1".into(),
            sender: UserRef::new("c1", "c1"),
            text: text.into(),
            sent_at_unix: 0,
        }))
    }

    #[tokio::test]
    async fn test_connection_sink_wraps_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = ConnectionSink {
            room: "room1".into(),
            outbound: tx,
        };

        sink.deliver(event("hi")).await.unwrap();

        match rx.recv().await.unwrap() {
            Frame::Event { room, envelope } => {
                assert_eq!(room, "room1");
                let StreamEnvelope::Message { message } = envelope;
                assert_eq!(message.text, "hi");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_sink_fails_once_connection_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let mut sink = ConnectionSink {
            room: "room1".into(),
            outbound: tx,
        };

        assert!(sink.deliver(event("hi")).await.is_err());
    }
}
