//! # relay-protocol
//!
//! Wire protocol for the relay chat service.
//!
//! This crate defines the values exchanged with clients and the binary
//! framing used to carry them:
//!
//! - **Types** - `ChatMessage`, `UserRef`, and the `StreamEnvelope` pushed
//!   over room streams
//! - **Frames** - the request/reply/push frame set
//! - **Codec** - MessagePack encoding behind a 4-byte length prefix
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Frame};
//!
//! let frame = Frame::send(1, "lobby", "hello", None);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod types;

pub use codec::{decode, encode, CodecError};
pub use frames::Frame;
pub use types::{ChatMessage, RoomId, StreamEnvelope, UserRef};
