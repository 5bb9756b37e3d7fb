//! Outbound transport frames and their postcard encoding.
//!
//! The send pipeline hands a [`Frame`] to the transport for every submission
//! and every discard. Frames are encoded with postcard and carry a 4-byte
//! little-endian length prefix so they can be written to a byte stream.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, RoomId};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Frame is incomplete or has an invalid length prefix.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// A request from the client to the messaging transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Submit a message to a room.
    Send {
        /// Target room.
        room_id: RoomId,
        /// The message, still carrying its temporary id.
        message: Message,
    },
    /// Drop a queued message that was never confirmed.
    Discard {
        /// Room the message was queued in.
        room_id: RoomId,
        /// Temporary id of the discarded message.
        message_id: MessageId,
    },
}

impl Frame {
    /// The room this frame targets.
    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        match self {
            Self::Send { room_id, .. } | Self::Discard { room_id, .. } => room_id,
        }
    }
}

/// Encodes a [`Frame`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`Frame`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`Frame`] with a 4-byte little-endian length prefix.
///
/// Wire format: `[u32 length (LE)][payload bytes]`
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the frame cannot be serialized,
/// or `CodecError::InvalidFrame` if the payload exceeds `u32::MAX` bytes.
pub fn encode_framed(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let payload = encode(frame)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::InvalidFrame(format!(
            "payload too large for framing: {} bytes",
            payload.len()
        ))
    })?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes a length-prefixed frame.
///
/// Returns the frame and the number of bytes consumed, prefix included.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` if the input is shorter than the
/// prefix or than the length it announces, or `CodecError::Serialization`
/// if the payload cannot be deserialized.
pub fn decode_framed(bytes: &[u8]) -> Result<(Frame, usize), CodecError> {
    let Some((prefix, rest)) = bytes.split_first_chunk::<4>() else {
        return Err(CodecError::InvalidFrame(format!(
            "need at least 4 bytes for length prefix, got {}",
            bytes.len()
        )));
    };
    let payload_len = u32::from_le_bytes(*prefix) as usize;
    if rest.len() < payload_len {
        return Err(CodecError::InvalidFrame(format!(
            "frame indicates {payload_len} bytes but only {} available",
            rest.len()
        )));
    }
    let frame = decode(&rest[..payload_len])?;
    Ok((frame, 4 + payload_len))
}
