use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, RwLock},
};

use parley_core::model::{
    DeliveryState, Message, MessageId, MessageKey, PendingSend, Room, RoomId, Sender, TempId,
};

use super::{MergeReport, MessageStore, PendingOutcome, Resolution, confirmed_for, sort_rooms};
use crate::error::StoreError;

/// In-memory store for tests, simulation and ephemeral sessions.
///
/// All state sits behind one `RwLock`, which is the single writer. Reads walk
/// a per-room ordered index of `(created_at, key)` and resolve each key in the
/// confirmed or pending map. A poisoned lock surfaces as
/// [`StoreError::Poisoned`] instead of panicking.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    rooms: HashMap<RoomId, Room>,

    /// Confirmed messages
    messages: HashMap<(RoomId, MessageId), Message>,

    /// Pending and failed messages
    pending: HashMap<TempId, Message>,

    /// Confirmed sends by the temp id they were sent under
    sent: HashMap<TempId, (RoomId, MessageId)>,

    /// Per-room ordering over both maps
    timelines: HashMap<RoomId, BTreeSet<(u64, MessageKey)>>,

    cursors: HashMap<RoomId, u64>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of confirmed messages across all rooms.
    pub fn message_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().map_err(|_| StoreError::Poisoned)?.messages.len())
    }

    /// Number of pending and failed entries.
    pub fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().map_err(|_| StoreError::Poisoned)?.pending.len())
    }
}

impl MemoryStoreInner {
    /// Merge one confirmed message. Returns the stored copy, or `None` if the
    /// message has no server id.
    fn merge_confirmed(&mut self, message: Message, report: &mut MergeReport) -> Option<Message> {
        let id = message.id.clone()?;

        let resolves = message
            .temp_id
            .as_ref()
            .filter(|temp_id| {
                self.pending.get(*temp_id).is_some_and(|entry| entry.room_id == message.room_id)
            })
            .cloned();
        if let Some(temp_id) = &resolves {
            self.remove_pending(temp_id);
        }

        let key = (message.room_id.clone(), id.clone());
        let stored = match self.messages.get_mut(&key) {
            Some(existing) => {
                existing.absorb(&message);
                existing.clone()
            },
            None => {
                self.timelines
                    .entry(message.room_id.clone())
                    .or_default()
                    .insert((message.created_at, MessageKey::Server(id)));
                self.messages.insert(key.clone(), message.clone());
                report.inserted.push(message.clone());
                message
            },
        };

        if let Some(temp_id) = resolves {
            self.sent.insert(temp_id.clone(), key);
            report.resolved.push((temp_id, stored.clone()));
        }

        let mut created = false;
        let room = self.rooms.entry(stored.room_id.clone()).or_insert_with(|| {
            created = true;
            Room::placeholder(stored.room_id.clone())
        });
        if room.record_message(&stored) || created {
            report.touch_room(room);
        }

        Some(stored)
    }

    fn remove_pending(&mut self, temp_id: &TempId) -> Option<Message> {
        let entry = self.pending.remove(temp_id)?;
        if let Some(timeline) = self.timelines.get_mut(&entry.room_id) {
            timeline.remove(&(entry.created_at, MessageKey::Local(temp_id.clone())));
        }
        Some(entry)
    }

    fn confirmed_send(&self, temp_id: &TempId) -> Option<&Message> {
        self.sent.get(temp_id).and_then(|key| self.messages.get(key))
    }

    fn lookup(&self, room_id: &RoomId, key: &MessageKey) -> Option<&Message> {
        match key {
            MessageKey::Server(id) => self.messages.get(&(room_id.clone(), id.clone())),
            MessageKey::Local(temp_id) => self.pending.get(temp_id),
        }
    }
}

impl MessageStore for MemoryStore {
    fn upsert_rooms(&self, rooms: Vec<Room>) -> Result<Vec<Room>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let mut stored = Vec::with_capacity(rooms.len());
        for room in rooms {
            let entry = match inner.rooms.get_mut(&room.id) {
                Some(existing) => {
                    existing.absorb(room);
                    existing.clone()
                },
                None => {
                    inner.rooms.insert(room.id.clone(), room.clone());
                    room
                },
            };
            stored.push(entry);
        }

        Ok(stored)
    }

    fn upsert_messages(&self, batch: Vec<Message>) -> Result<MergeReport, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let mut report = MergeReport::default();
        for message in batch {
            inner.merge_confirmed(message, &mut report);
        }

        Ok(report)
    }

    fn merge_page(&self, room_id: &RoomId, batch: Vec<Message>) -> Result<MergeReport, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let oldest = batch.iter().filter(|m| &m.room_id == room_id).map(|m| m.created_at).min();

        let mut report = MergeReport::default();
        for message in batch {
            inner.merge_confirmed(message, &mut report);
        }

        if let Some(oldest) = oldest {
            let cursor = inner.cursors.entry(room_id.clone()).or_insert(oldest);
            *cursor = (*cursor).min(oldest);
        }

        Ok(report)
    }

    fn upsert_pending(&self, send: PendingSend, sender: Sender) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        inner.remove_pending(&send.temp_id);

        let message = Message::pending(&send, sender);
        inner
            .timelines
            .entry(send.room_id.clone())
            .or_default()
            .insert((send.created_at, MessageKey::Local(send.temp_id.clone())));
        inner.pending.insert(send.temp_id, message.clone());

        Ok(message)
    }

    fn resolve_pending(
        &self,
        temp_id: &TempId,
        outcome: PendingOutcome,
    ) -> Result<Option<Resolution>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        match outcome {
            PendingOutcome::Confirmed(message) => {
                let Some(id) = message.id.clone() else {
                    return Err(StoreError::NotFound(format!(
                        "server id for confirmation of {temp_id}"
                    )));
                };

                let was_pending = inner.remove_pending(temp_id).is_some();
                let mut report = MergeReport::default();
                let stored = inner.merge_confirmed(confirmed_for(temp_id, message), &mut report);
                if let Some(stored) = &stored {
                    inner.sent.insert(temp_id.clone(), (stored.room_id.clone(), id));
                }

                Ok(stored.map(|message| {
                    if was_pending {
                        Resolution::Confirmed { message, room: report.rooms.pop() }
                    } else {
                        Resolution::AlreadyConfirmed(message)
                    }
                }))
            },
            PendingOutcome::Failed(reason) => {
                if let Some(entry) = inner.pending.get_mut(temp_id) {
                    entry.state = entry.state.max(DeliveryState::Failed);
                    entry.failure = Some(reason);
                    return Ok(Some(Resolution::Failed(entry.clone())));
                }
                Ok(inner.confirmed_send(temp_id).cloned().map(Resolution::AlreadyConfirmed))
            },
        }
    }

    fn discard_failed(&self, temp_id: &TempId) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let is_failed =
            inner.pending.get(temp_id).is_some_and(|entry| entry.state == DeliveryState::Failed);
        if !is_failed {
            return Err(StoreError::NotFound(format!("failed message {temp_id}")));
        }

        inner
            .remove_pending(temp_id)
            .ok_or_else(|| StoreError::NotFound(format!("failed message {temp_id}")))
    }

    fn query_messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;

        let Some(timeline) = inner.timelines.get(room_id) else {
            return Ok(Vec::new());
        };

        let keys: Vec<&(u64, MessageKey)> = match before {
            Some(before) => timeline
                .range(..(before, MessageKey::Server(MessageId::new(String::new()))))
                .rev()
                .take(limit)
                .collect(),
            None => timeline.iter().rev().take(limit).collect(),
        };

        Ok(keys.into_iter().filter_map(|(_, key)| inner.lookup(room_id, key).cloned()).collect())
    }

    fn query_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;

        let mut rooms: Vec<Room> = inner.rooms.values().cloned().collect();
        sort_rooms(&mut rooms);
        Ok(rooms)
    }

    fn find_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.messages.get(&(room_id.clone(), message_id.clone())).cloned())
    }

    fn pending(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.pending.get(temp_id).cloned())
    }

    fn cursor(&self, room_id: &RoomId) -> Result<Option<u64>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.cursors.get(room_id).copied())
    }
}
