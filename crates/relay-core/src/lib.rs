//! # relay-core
//!
//! In-memory state management for the relay chat service.
//!
//! This crate is the part of the relay with real concurrency in it:
//!
//! - **Room** - one room's bounded message history and live subscriber sinks
//! - **Hub** - registry creating rooms on first reference
//! - **ChatService** - the send / history / stream façade the transport
//!   layer calls into
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌─────────────┐     ┌───────┐     ┌────────┐
//! │ Transport │────▶│ ChatService │────▶│  Hub  │────▶│  Room  │
//! └───────────┘     └─────────────┘     └───────┘     └────────┘
//!                                                          │
//!                                                          ▼
//!                                                   subscriber sinks
//! ```

pub mod hub;
pub mod message;
pub mod room;
pub mod service;

pub use hub::Hub;
pub use message::RoomEvent;
pub use room::{Fanout, Room, Subscription, HISTORY_LIMIT, SINK_CAPACITY};
pub use service::{ChatService, DeliveryError, EventSink};
