//! Events published to the UI.

use parley_core::{
    ConnectionState,
    model::{Message, Room, RoomId, TempId},
};

/// Change notifications from the sync engine.
///
/// Published on a broadcast channel. Room-scoped streams filter on
/// [`ChatEvent::room_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A confirmed message appeared in the cache for the first time
    MessageAdded(Message),

    /// An optimistic message was written
    MessagePending(Message),

    /// A pending message was confirmed. Replace the row for `temp_id` in
    /// place.
    MessageConfirmed {
        /// Temp id of the resolved send
        temp_id: TempId,
        /// The confirmed message
        message: Message,
    },

    /// A send failed. The message stays visible for retry or discard.
    MessageFailed(Message),

    /// A failed message was discarded
    MessageDiscarded {
        /// Room of the discarded message
        room_id: RoomId,
        /// Temp id of the discarded send
        temp_id: TempId,
    },

    /// Someone started or stopped typing
    TypingChanged {
        /// Room the indicator applies to
        room_id: RoomId,
        /// Typing user
        user_id: String,
        /// `true` while typing
        typing: bool,
    },

    /// The observed room's realtime connection changed state
    ConnectionChanged {
        /// Observed room
        room_id: RoomId,
        /// New state
        state: ConnectionState,
    },

    /// A fetch fell back to cached data
    FetchFailed {
        /// Room being fetched. `None` for the room list.
        room_id: Option<RoomId>,
        /// Why the fetch failed
        reason: String,
    },

    /// Room metadata or activity changed
    RoomUpdated(Room),
}

impl ChatEvent {
    /// Room the event belongs to. `None` for events outside any room.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::MessageAdded(message)
            | Self::MessagePending(message)
            | Self::MessageConfirmed { message, .. }
            | Self::MessageFailed(message) => Some(&message.room_id),
            Self::MessageDiscarded { room_id, .. }
            | Self::TypingChanged { room_id, .. }
            | Self::ConnectionChanged { room_id, .. } => Some(room_id),
            Self::FetchFailed { room_id, .. } => room_id.as_ref(),
            Self::RoomUpdated(room) => Some(&room.id),
        }
    }
}
