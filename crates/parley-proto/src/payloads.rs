//! Payload types shared by the realtime channel and the REST API.
//!
//! The server uses the same message shape for pushed frames, history pages
//! and send responses. Timestamps are Unix milliseconds (UTC).

use serde::{Deserialize, Serialize};

/// A confirmed message as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Server-assigned message id
    pub id: String,

    /// Room the message belongs to
    pub room_id: String,

    /// Message text
    pub content: String,

    /// Creation time in Unix milliseconds
    pub created_at: u64,

    /// Author of the message
    pub sender: SenderPayload,

    /// Attachment references (media is uploaded separately)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,

    /// Temp id the sending client attached to its request.
    ///
    /// Present on send responses and on the server's echo of a client's own
    /// message, when the server propagates it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

/// Message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderPayload {
    /// User id
    pub id: String,

    /// Display name
    pub name: String,

    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Kind of media an attachment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Any other file
    File,
}

/// Reference to uploaded media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    /// Location of the uploaded media
    pub url: String,

    /// Media kind
    pub kind: AttachmentKind,

    /// Original file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Typing indicator, sent and received on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    /// Room the indicator applies to
    pub room_id: String,

    /// User who started or stopped typing
    pub user_id: String,

    /// `true` while the user is typing
    pub typing: bool,
}

/// Server acknowledgement that a client's message was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    /// Room the message was sent to
    pub room_id: String,

    /// Temp id the client attached to the send
    pub client_temp_id: String,

    /// Id the server assigned
    pub message_id: String,

    /// Server creation time in Unix milliseconds
    pub created_at: u64,
}

/// Room as returned by the REST room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPayload {
    /// Room id
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Room avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// Time of the latest activity in Unix milliseconds
    #[serde(default)]
    pub last_activity: u64,

    /// Preview of the latest message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

/// Body of a REST send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageBody {
    /// Message text
    pub content: String,

    /// Attachment references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,

    /// Client-generated temp id, echoed back by the server
    pub client_temp_id: String,
}

/// Body of a REST room creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomBody {
    /// Display title
    pub title: String,

    /// Users to add besides the creator
    pub member_ids: Vec<String>,
}
