//! Client error types.

use parley_core::{
    TransportError,
    model::{MessageId, RoomId, TempId},
};
use thiserror::Error;

use crate::rest::HttpError;

/// Errors from local cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backing database failed
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Stored value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A writer panicked while holding the store lock
    #[error("store lock poisoned")]
    Poisoned,

    /// The requested entry does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by the sync engine and gateway.
///
/// Transient transport failures never appear here; the connection retries them
/// internally. Fetch failures usually degrade to cached data instead of
/// returning an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Server does not know the room
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// REST send failed; the message is kept as failed for retry or discard
    #[error("send of {temp_id} failed: {reason}")]
    SendFailed {
        /// Temp id of the failed attempt
        temp_id: TempId,
        /// Why the send failed
        reason: String,
    },

    /// Server rejected the fetch and there is nothing to fall back to
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Pagination anchor is not in the local cache
    #[error("no message {message_id} in room {room_id} to page from")]
    StaleCursor {
        /// Room being paged
        room_id: RoomId,
        /// Anchor that could not be resolved
        message_id: MessageId,
    },

    /// Credentials were rejected. Requires re-authentication.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// REST request failed outside a fetch or send
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Realtime transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local cache failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Returns true if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SendFailed { .. } | Self::FetchFailed(_) => true,
            Self::Http(err) => err.is_transient(),
            Self::Transport(err) => err.is_transient(),
            Self::RoomNotFound(_)
            | Self::StaleCursor { .. }
            | Self::Unauthorized(_)
            | Self::Store(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_missing_rooms_are_not_transient() {
        assert!(!SyncError::Unauthorized("401".to_string()).is_transient());
        assert!(!SyncError::RoomNotFound(RoomId::new("r1")).is_transient());
        assert!(SyncError::Http(HttpError::Timeout).is_transient());
    }

    #[test]
    fn send_failure_names_the_attempt() {
        let err = SyncError::SendFailed {
            temp_id: TempId::new("tmp-1"),
            reason: "offline".to_string(),
        };
        assert_eq!(err.to_string(), "send of tmp-1 failed: offline");
    }
}
