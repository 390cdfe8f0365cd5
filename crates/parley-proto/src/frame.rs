//! Realtime frames.
//!
//! Every frame on the realtime channel is a single JSON object with a `"type"`
//! discriminator and the payload fields flattened next to it:
//!
//! ```text
//! {"type":"new_message","id":"m1","room_id":"r1","content":"hi",...}
//! {"type":"typing","room_id":"r1","user_id":"u2","typing":true}
//! {"type":"pong","nonce":7}
//! ```
//!
//! Decoding never falls back to alternative key names. A frame either matches
//! the schema of its declared type or is rejected with
//! [`ProtocolError::Malformed`].

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    payloads::{AckPayload, MessagePayload, TypingPayload},
};

/// Largest frame the decoder accepts (1 MiB).
///
/// Checked before JSON parsing so oversized input never reaches the parser.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frames the server pushes to the client.
///
/// # Invariants
///
/// - Forward compatibility: a well-formed object whose `"type"` is not listed
///   here decodes to [`InboundFrame::Unknown`]. Consumers ignore it.
/// - Strictness: a known `"type"` with missing or mistyped fields is an error,
///   never a partially filled value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A confirmed message was posted to the room
    NewMessage(MessagePayload),

    /// A member started or stopped typing
    Typing(TypingPayload),

    /// The server persisted a message this client sent
    Ack(AckPayload),

    /// Heartbeat reply
    Pong {
        /// Nonce copied from the matching ping
        nonce: u64,
    },

    /// Frame type this client does not know about
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decode a frame from raw bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `bytes` exceeds [`MAX_FRAME_SIZE`]
    /// - `ProtocolError::Malformed` if the bytes are not a JSON object matching
    ///   a known frame schema
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: MAX_FRAME_SIZE });
        }

        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Room the frame refers to. `None` for connection-level frames.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage(message) => Some(&message.room_id),
            Self::Typing(typing) => Some(&typing.room_id),
            Self::Ack(ack) => Some(&ack.room_id),
            Self::Pong { .. } | Self::Unknown => None,
        }
    }

    /// Frame type name as it appears on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::Typing(_) => "typing",
            Self::Ack(_) => "ack",
            Self::Pong { .. } => "pong",
            Self::Unknown => "unknown",
        }
    }
}

/// Frames the client pushes to the server.
///
/// Messages are not sent through the channel. The REST send is the single
/// authoritative write path, and the server fans confirmed messages out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Heartbeat request
    Ping {
        /// Echoed back in the pong
        nonce: u64,
    },

    /// Typing indicator for the channel's room
    Typing(TypingPayload),
}

impl OutboundFrame {
    /// Encode the frame as a JSON object.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Encode` if serialization fails
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}
