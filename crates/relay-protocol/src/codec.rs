//! Binary codec for relay frames.
//!
//! Frames travel as MessagePack maps behind a 4-byte big-endian length
//! prefix, so a stream of frames can be decoded incrementally from a read
//! buffer with `decode_from`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum encoded frame size (1 MiB). Chat frames are small; anything
/// larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge(usize),

    /// Not enough bytes for a complete frame.
    #[error("truncated frame: {0} more bytes needed")]
    Truncated(usize),

    /// MessagePack encoding failed.
    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding failed.
    #[error("decode: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame to length-prefixed bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let body = rmp_serde::to_vec_named(frame)?;

    if body.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(buf.freeze())
}

/// Decode a single frame from a complete byte slice.
///
/// # Errors
///
/// Returns an error if the slice is truncated, the frame is too large, or
/// deserialization fails.
pub fn decode(data: &[u8]) -> Result<Frame, CodecError> {
    if data.len() < PREFIX_LEN {
        return Err(CodecError::Truncated(PREFIX_LEN - data.len()));
    }

    let body_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    let total = PREFIX_LEN + body_len;
    if data.len() < total {
        return Err(CodecError::Truncated(total - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[PREFIX_LEN..total])?)
}

/// Try to decode the next frame from a read buffer, consuming it on success.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame.
///
/// # Errors
///
/// Returns an error if the pending frame is too large or deserialization
/// fails.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if body_len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(body_len));
    }

    if buf.len() < PREFIX_LEN + body_len {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len);
    Ok(Some(rmp_serde::from_slice(&body)?))
}
