//! Chat domain model.
//!
//! Rooms, messages and pending sends as the local cache stores them. Wire
//! payloads from [`parley_proto`] convert into these types at the boundary.
//!
//! # Identity
//!
//! Confirmed messages are identified by `(RoomId, MessageId)`. Optimistic
//! messages are identified by a [`TempId`]. The two id types are distinct and
//! live in separate key spaces ([`MessageKey::Server`] and
//! [`MessageKey::Local`]), so a temp id can never be mistaken for a server id.

use std::fmt;

use parley_proto::{
    AttachmentKind, AttachmentPayload, MessagePayload, RoomPayload, SenderPayload,
};
use serde::{Deserialize, Serialize};

use crate::env::Environment;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-assigned room identifier.
    RoomId
);

string_id!(
    /// Server-assigned message identifier.
    MessageId
);

string_id!(
    /// Client-generated identifier of one send attempt.
    TempId
);

impl TempId {
    /// Prefix of every generated temp id.
    pub const PREFIX: &'static str = "tmp-";

    /// Generate a fresh temp id from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self(format!("{}{:032x}", Self::PREFIX, env.random_u128()))
    }
}

/// Key of a message inside a room.
///
/// Ordering puts server ids before temp ids, which only matters as the
/// tie-break between entries with identical `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKey {
    /// Confirmed message
    Server(MessageId),
    /// Pending or failed message
    Local(TempId),
}

/// Delivery state of a message.
///
/// Ordered as a join semilattice: merging two copies of the same message keeps
/// the greater state, so `Confirmed` always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Written locally, REST send in flight
    Pending,
    /// REST send failed; kept for explicit retry
    Failed,
    /// Known to the server
    Confirmed,
}

/// Message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// User id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar URL
    pub avatar: Option<String>,
}

/// Reference to uploaded media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Location of the media
    pub url: String,
    /// Media kind
    pub kind: AttachmentKind,
    /// Original file name
    pub name: Option<String>,
    /// Size in bytes
    pub size: Option<u64>,
}

/// A chat message, confirmed or optimistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id. `None` until confirmed.
    pub id: Option<MessageId>,
    /// Temp id of the send attempt. `None` for messages from other clients.
    pub temp_id: Option<TempId>,
    /// Room the message belongs to
    pub room_id: RoomId,
    /// Author
    pub sender: Sender,
    /// Message text
    pub content: String,
    /// Attachment references
    pub attachments: Vec<Attachment>,
    /// Creation time in Unix milliseconds
    pub created_at: u64,
    /// Delivery state
    pub state: DeliveryState,
    /// Why the send failed. Only set when `state` is `Failed`.
    pub failure: Option<String>,
}

impl Message {
    /// Optimistic message for a pending send.
    #[must_use]
    pub fn pending(send: &PendingSend, sender: Sender) -> Self {
        Self {
            id: None,
            temp_id: Some(send.temp_id.clone()),
            room_id: send.room_id.clone(),
            sender,
            content: send.content.clone(),
            attachments: send.attachments.clone(),
            created_at: send.created_at,
            state: DeliveryState::Pending,
            failure: None,
        }
    }

    /// Key of this message in its room.
    ///
    /// Returns `None` for a message with neither a server id nor a temp id,
    /// which the store never holds.
    #[must_use]
    pub fn key(&self) -> Option<MessageKey> {
        match (&self.id, &self.temp_id) {
            (Some(id), _) => Some(MessageKey::Server(id.clone())),
            (None, Some(temp_id)) => Some(MessageKey::Local(temp_id.clone())),
            (None, None) => None,
        }
    }

    /// Whether the server knows this message.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.state == DeliveryState::Confirmed
    }

    /// Merge another copy of the same message into this one.
    ///
    /// Identity fields are kept. The delivery state joins, so the result does
    /// not depend on which copy arrived first.
    pub fn absorb(&mut self, other: &Message) {
        debug_assert_eq!(self.id, other.id);
        self.state = self.state.max(other.state);
        if self.temp_id.is_none() {
            self.temp_id.clone_from(&other.temp_id);
        }
        if self.state == DeliveryState::Confirmed {
            self.failure = None;
        }
    }
}

impl From<MessagePayload> for Message {
    fn from(payload: MessagePayload) -> Self {
        Self {
            id: Some(MessageId(payload.id)),
            temp_id: payload.client_temp_id.map(TempId),
            room_id: RoomId(payload.room_id),
            sender: payload.sender.into(),
            content: payload.content,
            attachments: payload.attachments.into_iter().map(Attachment::from).collect(),
            created_at: payload.created_at,
            state: DeliveryState::Confirmed,
            failure: None,
        }
    }
}

impl From<SenderPayload> for Sender {
    fn from(payload: SenderPayload) -> Self {
        Self { id: payload.id, name: payload.name, avatar: payload.avatar }
    }
}

impl From<AttachmentPayload> for Attachment {
    fn from(payload: AttachmentPayload) -> Self {
        Self { url: payload.url, kind: payload.kind, name: payload.name, size: payload.size }
    }
}

impl From<Attachment> for AttachmentPayload {
    fn from(attachment: Attachment) -> Self {
        Self {
            url: attachment.url,
            kind: attachment.kind,
            name: attachment.name,
            size: attachment.size,
        }
    }
}

/// A send between `send_message` and the REST response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSend {
    /// Client-generated id of this attempt
    pub temp_id: TempId,
    /// Target room
    pub room_id: RoomId,
    /// Message text
    pub content: String,
    /// Attachment references
    pub attachments: Vec<Attachment>,
    /// Local creation time in Unix milliseconds
    pub created_at: u64,
}

/// A conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room id
    pub id: RoomId,
    /// Display title. Empty for placeholder rooms created from a push event.
    pub title: String,
    /// Avatar URL
    pub avatar: Option<String>,
    /// Time of the latest activity in Unix milliseconds
    pub last_activity: u64,
    /// Preview of the latest message
    pub last_message: Option<String>,
}

impl Room {
    /// Room known only by id, created when a message references it first.
    #[must_use]
    pub fn placeholder(id: RoomId) -> Self {
        Self { id, title: String::new(), avatar: None, last_activity: 0, last_message: None }
    }

    /// Account for a message posted to this room.
    ///
    /// Returns true if activity or preview changed.
    pub fn record_message(&mut self, message: &Message) -> bool {
        if message.created_at > self.last_activity
            || (message.created_at == self.last_activity && self.last_message.is_none())
        {
            self.last_activity = message.created_at;
            self.last_message = Some(message.content.clone());
            return true;
        }
        false
    }

    /// Merge fresher metadata for the same room.
    ///
    /// Activity only moves forward; metadata from `other` wins when present.
    pub fn absorb(&mut self, other: Room) {
        debug_assert_eq!(self.id, other.id);
        if !other.title.is_empty() {
            self.title = other.title;
        }
        if other.avatar.is_some() {
            self.avatar = other.avatar;
        }
        if other.last_activity > self.last_activity {
            self.last_activity = other.last_activity;
            if other.last_message.is_some() {
                self.last_message = other.last_message;
            }
        } else if self.last_message.is_none() {
            self.last_message = other.last_message;
        }
    }
}

impl From<RoomPayload> for Room {
    fn from(payload: RoomPayload) -> Self {
        Self {
            id: RoomId(payload.id),
            title: payload.title,
            avatar: payload.avatar,
            last_activity: payload.last_activity,
            last_message: payload.last_message,
        }
    }
}
