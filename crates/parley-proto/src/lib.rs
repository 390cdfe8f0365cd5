//! Parley wire protocol.
//!
//! Typed schema for everything that crosses the network boundary: realtime
//! frames pushed over the per-room channel, the payloads shared between the
//! realtime channel and the REST history API, and the handshake that opens a
//! channel.
//!
//! # Frames
//!
//! Realtime frames are JSON objects discriminated by a `"type"` field.
//! [`InboundFrame`] and [`OutboundFrame`] decode and encode them through serde
//! tagged enums, so a frame either matches a known schema or is rejected.
//! Unknown frame types decode to [`InboundFrame::Unknown`] and are ignored by
//! consumers rather than treated as errors.
//!
//! # Channels
//!
//! Each room gets its own namespace-scoped channel. See [`channel_path`] and
//! [`HandshakeHeaders`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod channel;
pub mod errors;
mod frame;
pub mod payloads;

pub use channel::{
    API_KEY_HEADER, AUTHORIZATION_HEADER, HandshakeHeaders, PRODUCT_ID_HEADER, channel_path,
};
pub use errors::{ProtocolError, Result};
pub use frame::{InboundFrame, MAX_FRAME_SIZE, OutboundFrame};
pub use payloads::{
    AckPayload, AttachmentKind, AttachmentPayload, CreateRoomBody, MessagePayload, RoomPayload,
    SendMessageBody, SenderPayload, TypingPayload,
};
