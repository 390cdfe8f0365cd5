//! REST collaborator interface.
//!
//! The HTTP client itself lives outside this crate. [`RestClient`] is the seam:
//! production wires in a real HTTP stack, tests wire in a scripted server.

use std::future::Future;

use parley_core::model::RoomId;
use parley_proto::{CreateRoomBody, MessagePayload, RoomPayload, SendMessageBody};
use thiserror::Error;

/// REST endpoints the sync engine calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /rooms`
    ListRooms,

    /// `POST /rooms`
    CreateRoom(CreateRoomBody),

    /// `GET /rooms/{room}/messages`
    History {
        /// Room to page
        room: RoomId,
        /// Only messages created strictly before this Unix millisecond
        before: Option<u64>,
        /// Maximum number of messages
        limit: usize,
    },

    /// `POST /rooms/{room}/messages`
    SendMessage {
        /// Target room
        room: RoomId,
        /// Message to create
        body: SendMessageBody,
    },
}

impl Endpoint {
    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::ListRooms | Self::History { .. } => "GET",
            Self::CreateRoom(_) | Self::SendMessage { .. } => "POST",
        }
    }

    /// Request path including the query string.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::ListRooms | Self::CreateRoom(_) => "/rooms".to_string(),
            Self::History { room, before: Some(before), limit } => {
                format!("/rooms/{room}/messages?before={before}&limit={limit}")
            },
            Self::History { room, before: None, limit } => {
                format!("/rooms/{room}/messages?limit={limit}")
            },
            Self::SendMessage { room, .. } => format!("/rooms/{room}/messages"),
        }
    }
}

/// Decoded REST response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestResponse {
    /// Room list
    Rooms(Vec<RoomPayload>),
    /// A single room
    Room(RoomPayload),
    /// A page of messages
    Messages(Vec<MessagePayload>),
    /// A single message
    Message(MessagePayload),
}

impl RestResponse {
    /// Expect a room list.
    pub fn into_rooms(self) -> Result<Vec<RoomPayload>, HttpError> {
        match self {
            Self::Rooms(rooms) => Ok(rooms),
            other => Err(other.unexpected("room list")),
        }
    }

    /// Expect a single room.
    pub fn into_room(self) -> Result<RoomPayload, HttpError> {
        match self {
            Self::Room(room) => Ok(room),
            other => Err(other.unexpected("room")),
        }
    }

    /// Expect a page of messages.
    pub fn into_messages(self) -> Result<Vec<MessagePayload>, HttpError> {
        match self {
            Self::Messages(messages) => Ok(messages),
            other => Err(other.unexpected("message page")),
        }
    }

    /// Expect a single message.
    pub fn into_message(self) -> Result<MessagePayload, HttpError> {
        match self {
            Self::Message(message) => Ok(message),
            other => Err(other.unexpected("message")),
        }
    }

    fn unexpected(&self, expected: &str) -> HttpError {
        let got = match self {
            Self::Rooms(_) => "room list",
            Self::Room(_) => "room",
            Self::Messages(_) => "message page",
            Self::Message(_) => "message",
        };
        HttpError::Decode(format!("expected {expected}, got {got}"))
    }
}

/// REST failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Server could not be reached
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Credentials rejected (401/403)
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success status
    #[error("status {code}: {message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response message
        message: String,
    },

    /// Response body did not match the expected schema
    #[error("invalid response: {0}")]
    Decode(String),
}

impl HttpError {
    /// Returns true if the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout => true,
            Self::Status { code, .. } => *code >= 500,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }

    /// Returns true for a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { code: 404, .. })
    }
}

/// Asynchronous REST client.
///
/// Clone is expected to be cheap; implementations share their connection pool.
pub trait RestClient: Clone + Send + Sync + 'static {
    /// Perform a request and decode its body.
    fn request(
        &self,
        endpoint: Endpoint,
    ) -> impl Future<Output = Result<RestResponse, HttpError>> + Send;
}
