//! Local message cache.
//!
//! Trait-based abstraction over the durable cache of rooms, messages and
//! pending sends. The trait is synchronous: every operation is short and runs
//! under a single writer, so readers never observe a half-applied merge.
//!
//! # Merge semantics
//!
//! Confirmed messages are keyed by `(room_id, message_id)`. Merging a message
//! that is already stored keeps the stored identity and joins the delivery
//! state, which makes merges idempotent and independent of arrival order. REST
//! history, REST send responses, pushed frames and push acks all go through the
//! same merge.
//!
//! Pending and failed messages live in a separate collection keyed by
//! [`TempId`]. Resolution moves an entry from that collection into the
//! confirmed one in a single write. Confirmed sends stay indexed by temp id.

mod memory;
mod redb;

pub use memory::MemoryStore;
use parley_core::model::{Message, MessageId, PendingSend, Room, RoomId, Sender, TempId};

pub use self::redb::RedbStore;
use crate::error::StoreError;

/// Result of merging a batch of confirmed messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Messages that were not stored before, in batch order
    pub inserted: Vec<Message>,
    /// Pending sends resolved by a message carrying their temp id
    pub resolved: Vec<(TempId, Message)>,
    /// Rooms whose metadata changed
    pub rooms: Vec<Room>,
}

impl MergeReport {
    /// Whether the merge changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.resolved.is_empty() && self.rooms.is_empty()
    }

    fn touch_room(&mut self, room: &Room) {
        match self.rooms.iter_mut().find(|r| r.id == room.id) {
            Some(existing) => existing.clone_from(room),
            None => self.rooms.push(room.clone()),
        }
    }
}

/// How a pending send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Server accepted the message
    Confirmed(Message),
    /// Send failed for this reason
    Failed(String),
}

/// What resolving a pending send did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The pending entry was replaced by this confirmed message
    Confirmed {
        /// Stored confirmed message
        message: Message,
        /// The message's room, if its metadata changed
        room: Option<Room>,
    },
    /// The entry was marked failed
    Failed(Message),
    /// Another path confirmed the send before this call
    AlreadyConfirmed(Message),
}

impl Resolution {
    /// The message the send resolved to.
    #[must_use]
    pub fn message(&self) -> &Message {
        match self {
            Self::Confirmed { message, .. }
            | Self::Failed(message)
            | Self::AlreadyConfirmed(message) => message,
        }
    }
}

/// Durable cache of rooms, messages and pending sends.
///
/// Must be Clone (shared between the engine and its session pump), Send + Sync,
/// and synchronous. Implementations share internal state via Arc, so clones
/// access the same underlying store.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Merge rooms by id.
    ///
    /// Activity timestamps only move forward. Returns the stored rooms.
    fn upsert_rooms(&self, rooms: Vec<Room>) -> Result<Vec<Room>, StoreError>;

    /// Merge one room by id. Returns the stored room.
    fn upsert_room(&self, room: Room) -> Result<Room, StoreError> {
        let id = room.id.clone();
        self.upsert_rooms(vec![room])?
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("room {id}")))
    }

    /// Merge confirmed messages by `(room_id, id)`.
    ///
    /// # Invariants
    ///
    /// - Re-merging a stored id never changes its identity or position
    /// - Delivery state joins, so `Confirmed` is never downgraded
    /// - A message carrying the temp id of a pending send replaces that entry
    /// - Messages without a server id are ignored
    fn upsert_messages(&self, batch: Vec<Message>) -> Result<MergeReport, StoreError>;

    /// Merge a history page and extend the room's cursor in one write.
    ///
    /// The cursor moves to the oldest `created_at` in the batch if that is
    /// older than the current cursor.
    fn merge_page(&self, room_id: &RoomId, batch: Vec<Message>) -> Result<MergeReport, StoreError>;

    /// Store an optimistic message for a send in flight.
    fn upsert_pending(&self, send: PendingSend, sender: Sender) -> Result<Message, StoreError>;

    /// Resolve a pending send.
    ///
    /// `Confirmed` replaces the pending entry with the confirmed message in one
    /// write; if the entry was already resolved, the message is merged by id
    /// and reported as [`Resolution::AlreadyConfirmed`]. `Failed` marks the
    /// entry failed and keeps it, unless the send was already confirmed.
    ///
    /// Returns `None` if `Failed` finds neither an entry nor a confirmed
    /// message for `temp_id`.
    fn resolve_pending(
        &self,
        temp_id: &TempId,
        outcome: PendingOutcome,
    ) -> Result<Option<Resolution>, StoreError>;

    /// Remove a failed entry.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if there is no failed entry for `temp_id`
    fn discard_failed(&self, temp_id: &TempId) -> Result<Message, StoreError>;

    /// Messages of a room, newest first.
    ///
    /// Ordered by `created_at` descending with the message key as tie-break.
    /// Includes pending and failed entries. With `before`, only messages
    /// created strictly earlier are returned.
    fn query_messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// All rooms, most recently active first (id tie-break).
    fn query_rooms(&self) -> Result<Vec<Room>, StoreError>;

    /// A confirmed message by id.
    fn find_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<Message>, StoreError>;

    /// A pending or failed entry by temp id.
    fn pending(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError>;

    /// Oldest `created_at` loaded through history pages. `None` before the
    /// first page.
    fn cursor(&self, room_id: &RoomId) -> Result<Option<u64>, StoreError>;
}

/// Sort rooms by activity, newest first.
fn sort_rooms(rooms: &mut [Room]) {
    rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity).then_with(|| a.id.cmp(&b.id)));
}

/// Confirmed copy of a message about to replace a pending entry.
fn confirmed_for(temp_id: &TempId, mut message: Message) -> Message {
    message.temp_id = Some(temp_id.clone());
    message.state = parley_core::model::DeliveryState::Confirmed;
    message.failure = None;
    message
}
