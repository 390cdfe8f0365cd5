//! Redb-backed durable store.
//!
//! Uses Redb's ACID transactions, so a merge batch and its cursor advance land
//! together or not at all. All state survives restarts.

use std::{path::Path, sync::Arc};

use parley_core::model::{
    DeliveryState, Message, MessageId, MessageKey, PendingSend, Room, RoomId, Sender, TempId,
};
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Serialize, de::DeserializeOwned};

use super::{MergeReport, MessageStore, PendingOutcome, Resolution, confirmed_for, sort_rooms};
use crate::error::StoreError;

/// Table: rooms
/// Key: room id
/// Value: CBOR-encoded Room
const ROOMS: TableDefinition<&str, &[u8]> = TableDefinition::new("rooms");

/// Table: messages
/// Key: [room_len: u16 BE][room id][message id]
/// Value: CBOR-encoded Message (confirmed)
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: pending
/// Key: temp id
/// Value: CBOR-encoded Message (pending or failed)
const PENDING: TableDefinition<&str, &[u8]> = TableDefinition::new("pending");

/// Table: sent
/// Key: temp id of a confirmed send
/// Value: MESSAGES key of the confirmed message
const SENT: TableDefinition<&str, &[u8]> = TableDefinition::new("sent");

/// Table: timeline
/// Key: [room_len: u16 BE][room id][created_at: u64 BE][kind: u8][id]
/// Value: empty
///
/// Kind 0 points into MESSAGES, kind 1 into PENDING. Keys sort by room, then
/// `created_at`, then [`MessageKey`] order.
const TIMELINE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("timeline");

/// Table: cursors
/// Key: room id
/// Value: oldest paged `created_at`
const CURSORS: TableDefinition<&str, u64> = TableDefinition::new("cursors");

const KIND_SERVER: u8 = 0;
const KIND_LOCAL: u8 = 1;
const EMPTY: &[u8] = &[];

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking; Redb admits one write
/// transaction at a time, which serializes all mutations. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(ROOMS).map_err(io)?;
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(PENDING).map_err(io)?;
            let _ = txn.open_table(SENT).map_err(io)?;
            let _ = txn.open_table(TIMELINE).map_err(io)?;
            let _ = txn.open_table(CURSORS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&Writer<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let txn = self.db.begin_write().map_err(io)?;
        let result = f(&Writer { txn: &txn })?;
        txn.commit().map_err(io)?;
        Ok(result)
    }

    fn read(&self) -> Result<ReadTransaction, StoreError> {
        self.db.begin_read().map_err(io)
    }
}

/// Table access within one write transaction.
///
/// Each accessor opens its table and drops it before returning, so accessors
/// can be freely interleaved.
struct Writer<'a> {
    txn: &'a WriteTransaction,
}

impl Writer<'_> {
    fn message(&self, key: &[u8]) -> Result<Option<Message>, StoreError> {
        let table = self.txn.open_table(MESSAGES).map_err(io)?;
        let value = table.get(key).map_err(io)?;
        let message = value.map(|v| decode(v.value())).transpose()?;
        Ok(message)
    }

    fn put_message(&self, key: &[u8], message: &Message) -> Result<(), StoreError> {
        let bytes = encode(message)?;
        let mut table = self.txn.open_table(MESSAGES).map_err(io)?;
        table.insert(key, bytes.as_slice()).map_err(io)?;
        Ok(())
    }

    fn pending(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError> {
        let table = self.txn.open_table(PENDING).map_err(io)?;
        let value = table.get(temp_id.as_str()).map_err(io)?;
        let message = value.map(|v| decode(v.value())).transpose()?;
        Ok(message)
    }

    fn put_pending(&self, message: &Message, temp_id: &TempId) -> Result<(), StoreError> {
        let bytes = encode(message)?;
        let mut table = self.txn.open_table(PENDING).map_err(io)?;
        table.insert(temp_id.as_str(), bytes.as_slice()).map_err(io)?;
        Ok(())
    }

    /// Remove a pending entry and its timeline key.
    fn remove_pending(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError> {
        let removed = {
            let mut table = self.txn.open_table(PENDING).map_err(io)?;
            let old = table.remove(temp_id.as_str()).map_err(io)?;
            old.map(|v| decode::<Message>(v.value())).transpose()?
        };

        if let Some(entry) = &removed {
            let key =
                timeline_key(&entry.room_id, entry.created_at, &MessageKey::Local(temp_id.clone()))?;
            self.unindex(&key)?;
        }
        Ok(removed)
    }

    fn put_sent(&self, temp_id: &TempId, key: &[u8]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(SENT).map_err(io)?;
        table.insert(temp_id.as_str(), key).map_err(io)?;
        Ok(())
    }

    fn confirmed_send(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError> {
        let key = {
            let table = self.txn.open_table(SENT).map_err(io)?;
            let value = table.get(temp_id.as_str()).map_err(io)?;
            value.map(|v| v.value().to_vec())
        };
        match key {
            Some(key) => self.message(&key),
            None => Ok(None),
        }
    }

    fn room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        let table = self.txn.open_table(ROOMS).map_err(io)?;
        let value = table.get(room_id.as_str()).map_err(io)?;
        let room = value.map(|v| decode(v.value())).transpose()?;
        Ok(room)
    }

    fn put_room(&self, room: &Room) -> Result<(), StoreError> {
        let bytes = encode(room)?;
        let mut table = self.txn.open_table(ROOMS).map_err(io)?;
        table.insert(room.id.as_str(), bytes.as_slice()).map_err(io)?;
        Ok(())
    }

    fn index(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(TIMELINE).map_err(io)?;
        table.insert(key, EMPTY).map_err(io)?;
        Ok(())
    }

    fn unindex(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(TIMELINE).map_err(io)?;
        table.remove(key).map_err(io)?;
        Ok(())
    }

    fn extend_cursor(&self, room_id: &RoomId, oldest: u64) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(CURSORS).map_err(io)?;
        let current = table.get(room_id.as_str()).map_err(io)?.map(|v| v.value());
        let cursor = current.map_or(oldest, |current| current.min(oldest));
        table.insert(room_id.as_str(), cursor).map_err(io)?;
        Ok(())
    }

    /// Merge one confirmed message. Mirrors the in-memory merge.
    fn merge_confirmed(
        &self,
        message: Message,
        report: &mut MergeReport,
    ) -> Result<Option<Message>, StoreError> {
        let Some(id) = message.id.clone() else {
            return Ok(None);
        };

        let mut resolves = None;
        if let Some(temp_id) = &message.temp_id {
            let same_room =
                self.pending(temp_id)?.is_some_and(|entry| entry.room_id == message.room_id);
            if same_room {
                self.remove_pending(temp_id)?;
                resolves = Some(temp_id.clone());
            }
        }

        let key = message_key(&message.room_id, &id)?;
        let stored = match self.message(&key)? {
            Some(mut existing) => {
                existing.absorb(&message);
                self.put_message(&key, &existing)?;
                existing
            },
            None => {
                let index_key =
                    timeline_key(&message.room_id, message.created_at, &MessageKey::Server(id))?;
                self.index(&index_key)?;
                self.put_message(&key, &message)?;
                report.inserted.push(message.clone());
                message
            },
        };

        if let Some(temp_id) = resolves {
            self.put_sent(&temp_id, &key)?;
            report.resolved.push((temp_id, stored.clone()));
        }

        let (mut room, created) = match self.room(&stored.room_id)? {
            Some(room) => (room, false),
            None => (Room::placeholder(stored.room_id.clone()), true),
        };
        if room.record_message(&stored) || created {
            self.put_room(&room)?;
            report.touch_room(&room);
        }

        Ok(Some(stored))
    }
}

impl MessageStore for RedbStore {
    fn upsert_rooms(&self, rooms: Vec<Room>) -> Result<Vec<Room>, StoreError> {
        self.write(|w| {
            let mut stored = Vec::with_capacity(rooms.len());
            for room in rooms {
                let merged = match w.room(&room.id)? {
                    Some(mut existing) => {
                        existing.absorb(room);
                        existing
                    },
                    None => room,
                };
                w.put_room(&merged)?;
                stored.push(merged);
            }
            Ok(stored)
        })
    }

    fn upsert_messages(&self, batch: Vec<Message>) -> Result<MergeReport, StoreError> {
        self.write(|w| {
            let mut report = MergeReport::default();
            for message in batch {
                w.merge_confirmed(message, &mut report)?;
            }
            Ok(report)
        })
    }

    fn merge_page(&self, room_id: &RoomId, batch: Vec<Message>) -> Result<MergeReport, StoreError> {
        let oldest = batch.iter().filter(|m| &m.room_id == room_id).map(|m| m.created_at).min();

        self.write(|w| {
            let mut report = MergeReport::default();
            for message in batch {
                w.merge_confirmed(message, &mut report)?;
            }
            if let Some(oldest) = oldest {
                w.extend_cursor(room_id, oldest)?;
            }
            Ok(report)
        })
    }

    fn upsert_pending(&self, send: PendingSend, sender: Sender) -> Result<Message, StoreError> {
        self.write(|w| {
            w.remove_pending(&send.temp_id)?;

            let message = Message::pending(&send, sender);
            let key =
                timeline_key(&send.room_id, send.created_at, &MessageKey::Local(send.temp_id.clone()))?;
            w.index(&key)?;
            w.put_pending(&message, &send.temp_id)?;
            Ok(message)
        })
    }

    fn resolve_pending(
        &self,
        temp_id: &TempId,
        outcome: PendingOutcome,
    ) -> Result<Option<Resolution>, StoreError> {
        self.write(|w| match outcome {
            PendingOutcome::Confirmed(message) => {
                let Some(id) = message.id.clone() else {
                    return Err(StoreError::NotFound(format!(
                        "server id for confirmation of {temp_id}"
                    )));
                };

                let was_pending = w.remove_pending(temp_id)?.is_some();
                let mut report = MergeReport::default();
                let Some(stored) = w.merge_confirmed(confirmed_for(temp_id, message), &mut report)?
                else {
                    return Ok(None);
                };
                w.put_sent(temp_id, &message_key(&stored.room_id, &id)?)?;

                Ok(Some(if was_pending {
                    Resolution::Confirmed { message: stored, room: report.rooms.pop() }
                } else {
                    Resolution::AlreadyConfirmed(stored)
                }))
            },
            PendingOutcome::Failed(reason) => {
                let Some(mut entry) = w.pending(temp_id)? else {
                    return Ok(w.confirmed_send(temp_id)?.map(Resolution::AlreadyConfirmed));
                };
                entry.state = entry.state.max(DeliveryState::Failed);
                entry.failure = Some(reason);
                w.put_pending(&entry, temp_id)?;
                Ok(Some(Resolution::Failed(entry)))
            },
        })
    }

    fn discard_failed(&self, temp_id: &TempId) -> Result<Message, StoreError> {
        self.write(|w| {
            let is_failed =
                w.pending(temp_id)?.is_some_and(|entry| entry.state == DeliveryState::Failed);
            if !is_failed {
                return Err(StoreError::NotFound(format!("failed message {temp_id}")));
            }

            w.remove_pending(temp_id)?
                .ok_or_else(|| StoreError::NotFound(format!("failed message {temp_id}")))
        })
    }

    fn query_messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let txn = self.read()?;
        let timeline = txn.open_table(TIMELINE).map_err(io)?;

        let prefix = room_prefix(room_id)?;
        let start = prefix.clone();
        let mut end = prefix.clone();
        match before {
            Some(before) => end.extend_from_slice(&before.to_be_bytes()),
            None => {
                end.extend_from_slice(&u64::MAX.to_be_bytes());
                end.push(u8::MAX);
            },
        }

        let mut keys = Vec::with_capacity(limit.min(256));
        for entry in timeline.range(start.as_slice()..end.as_slice()).map_err(io)?.rev() {
            if keys.len() >= limit {
                break;
            }
            let (key, _) = entry.map_err(io)?;
            keys.push(decode_timeline_key(key.value(), prefix.len())?);
        }

        let messages = txn.open_table(MESSAGES).map_err(io)?;
        let pending = txn.open_table(PENDING).map_err(io)?;

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match &key {
                MessageKey::Server(id) => {
                    let bytes = message_key(room_id, id)?;
                    messages.get(bytes.as_slice()).map_err(io)?.map(|v| decode(v.value()))
                },
                MessageKey::Local(temp_id) => {
                    pending.get(temp_id.as_str()).map_err(io)?.map(|v| decode(v.value()))
                },
            };
            if let Some(message) = value.transpose()? {
                out.push(message);
            }
        }

        Ok(out)
    }

    fn query_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let txn = self.read()?;
        let table = txn.open_table(ROOMS).map_err(io)?;

        let mut rooms = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            rooms.push(decode::<Room>(value.value())?);
        }

        sort_rooms(&mut rooms);
        Ok(rooms)
    }

    fn find_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<Option<Message>, StoreError> {
        let txn = self.read()?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let key = message_key(room_id, message_id)?;
        let value = table.get(key.as_slice()).map_err(io)?;
        let message = value.map(|v| decode(v.value())).transpose()?;
        Ok(message)
    }

    fn pending(&self, temp_id: &TempId) -> Result<Option<Message>, StoreError> {
        let txn = self.read()?;
        let table = txn.open_table(PENDING).map_err(io)?;

        let value = table.get(temp_id.as_str()).map_err(io)?;
        let message = value.map(|v| decode(v.value())).transpose()?;
        Ok(message)
    }

    fn cursor(&self, room_id: &RoomId) -> Result<Option<u64>, StoreError> {
        let txn = self.read()?;
        let table = txn.open_table(CURSORS).map_err(io)?;

        let cursor = table.get(room_id.as_str()).map_err(io)?.map(|v| v.value());
        Ok(cursor)
    }
}

fn io(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// `[room_len: u16 BE][room id]`
///
/// The length prefix keeps one room's keys contiguous even when another room
/// id starts with the same bytes.
fn room_prefix(room_id: &RoomId) -> Result<Vec<u8>, StoreError> {
    let room = room_id.as_str().as_bytes();
    let len = u16::try_from(room.len())
        .map_err(|_| StoreError::Serialization(format!("room id of {} bytes", room.len())))?;

    let mut key = Vec::with_capacity(2 + room.len() + 32);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(room);
    Ok(key)
}

fn message_key(room_id: &RoomId, message_id: &MessageId) -> Result<Vec<u8>, StoreError> {
    let mut key = room_prefix(room_id)?;
    key.extend_from_slice(message_id.as_str().as_bytes());
    Ok(key)
}

fn timeline_key(
    room_id: &RoomId,
    created_at: u64,
    message_key: &MessageKey,
) -> Result<Vec<u8>, StoreError> {
    let mut key = room_prefix(room_id)?;
    key.extend_from_slice(&created_at.to_be_bytes());
    match message_key {
        MessageKey::Server(id) => {
            key.push(KIND_SERVER);
            key.extend_from_slice(id.as_str().as_bytes());
        },
        MessageKey::Local(temp_id) => {
            key.push(KIND_LOCAL);
            key.extend_from_slice(temp_id.as_str().as_bytes());
        },
    }
    Ok(key)
}

fn decode_timeline_key(key: &[u8], prefix_len: usize) -> Result<MessageKey, StoreError> {
    let corrupt = || StoreError::Serialization("truncated timeline key".to_string());

    let rest = key.get(prefix_len + 8..).ok_or_else(corrupt)?;
    let (&kind, id) = rest.split_first().ok_or_else(corrupt)?;
    let id = std::str::from_utf8(id).map_err(|e| StoreError::Serialization(e.to_string()))?;

    match kind {
        KIND_SERVER => Ok(MessageKey::Server(MessageId::new(id))),
        KIND_LOCAL => Ok(MessageKey::Local(TempId::new(id))),
        other => Err(StoreError::Serialization(format!("unknown timeline kind {other}"))),
    }
}
