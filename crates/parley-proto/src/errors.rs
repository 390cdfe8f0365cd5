//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire data.
///
/// None of these are fatal to a connection. A frame that fails to decode is
/// dropped by the transport and the channel keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the rejected frame
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Frame is not valid JSON or does not match any known schema
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Frame could not be serialized
    #[error("frame encode failed: {0}")]
    Encode(String),
}
