//! Sync engine.
//!
//! Orchestrates the three ways messages move: REST history fetches, optimistic
//! sends, and realtime pushes. All of them end in the [`MessageStore`], and
//! every change the store reports is published as a [`ChatEvent`].
//!
//! # Reconciliation
//!
//! A confirmed message is merged by `(room_id, id)` no matter which path
//! delivered it: REST send response, history page, pushed frame or push ack.
//! The second arrival of an id changes nothing and publishes nothing, so the
//! order in which the paths race does not matter.
//!
//! # Degradation
//!
//! Fetches that fail for network reasons return the cached data marked
//! [`Freshness::Stale`] and publish [`ChatEvent::FetchFailed`]. Paging back
//! has no unseen cached data to offer, so it degrades to an empty page. Sends never
//! retry on their own: a failed send stays in the cache as `Failed` until the
//! caller retries or discards it.

use std::collections::HashMap;

use parley_core::{
    ConnectionState, Environment,
    model::{Attachment, DeliveryState, Message, MessageId, PendingSend, Room, RoomId, TempId},
};
use parley_proto::{AttachmentPayload, CreateRoomBody, MessagePayload, SendMessageBody};
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::{AuthContext, SyncConfig},
    error::{StoreError, SyncError},
    event::ChatEvent,
    rest::{Endpoint, HttpError, RestClient, RestResponse},
    session::{InboundEvent, SessionManager},
    store::{MergeReport, MessageStore, PendingOutcome, Resolution},
    transport::Connector,
};

/// Whether fetched data came from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Merged from a successful server response
    Fresh,
    /// Served from the cache because the server could not be reached
    Stale {
        /// Why the fetch failed
        reason: String,
    },
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    /// Fetched items, in display order
    pub items: Vec<T>,
    /// Where the items came from
    pub freshness: Freshness,
}

impl<T> Fetched<T> {
    fn fresh(items: Vec<T>) -> Self {
        Self { items, freshness: Freshness::Fresh }
    }

    fn stale(items: Vec<T>, reason: String) -> Self {
        Self { items, freshness: Freshness::Stale { reason } }
    }

    /// Whether the items are cached data served after a failed fetch.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }
}

/// Applies merges to the store and publishes what changed.
///
/// Shared by the engine and the session pump task.
#[derive(Clone)]
struct Reconciler<S> {
    store: S,
    events: broadcast::Sender<ChatEvent>,
}

impl<S: MessageStore> Reconciler<S> {
    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine, the cache is the source of truth
        let _ = self.events.send(event);
    }

    fn apply_report(&self, report: &MergeReport) {
        for (temp_id, message) in &report.resolved {
            self.publish(ChatEvent::MessageConfirmed {
                temp_id: temp_id.clone(),
                message: message.clone(),
            });
        }

        for message in &report.inserted {
            let resolved = report.resolved.iter().any(|(_, m)| m.id == message.id);
            if !resolved {
                self.publish(ChatEvent::MessageAdded(message.clone()));
            }
        }

        for room in &report.rooms {
            self.publish(ChatEvent::RoomUpdated(room.clone()));
        }
    }

    /// Replace a pending send with its confirmed message.
    ///
    /// Publishes only if this call resolved the entry; a send already
    /// confirmed by an ack or echo returns the stored message silently.
    fn confirm(&self, temp_id: &TempId, message: Message) -> Result<Message, SyncError> {
        let room_id = message.room_id.clone();
        let resolution = self
            .store
            .resolve_pending(temp_id, PendingOutcome::Confirmed(message))?
            .ok_or_else(|| StoreError::NotFound(format!("confirmation of {temp_id}")))?;

        match resolution {
            Resolution::Confirmed { message, room } => {
                debug!(%room_id, %temp_id, id = ?message.id, "pending send confirmed");
                self.publish(ChatEvent::MessageConfirmed {
                    temp_id: temp_id.clone(),
                    message: message.clone(),
                });
                if let Some(room) = room {
                    self.publish(ChatEvent::RoomUpdated(room));
                }
                Ok(message)
            },
            Resolution::AlreadyConfirmed(message) | Resolution::Failed(message) => {
                debug!(%room_id, %temp_id, id = ?message.id, "send was already confirmed");
                Ok(message)
            },
        }
    }

    /// Apply one realtime event of `room_id`.
    fn handle(&self, room_id: &RoomId, event: InboundEvent) -> Result<(), SyncError> {
        match event {
            InboundEvent::NewMessage(message) => {
                let report = self.store.upsert_messages(vec![message])?;
                if report.is_empty() {
                    debug!(%room_id, "duplicate push ignored");
                }
                self.apply_report(&report);
            },
            InboundEvent::Ack { temp_id, message_id, created_at } => {
                match self.store.pending(&temp_id)? {
                    Some(entry) if &entry.room_id == room_id => {
                        let message = Message {
                            id: Some(message_id),
                            created_at,
                            state: DeliveryState::Confirmed,
                            failure: None,
                            ..entry
                        };
                        self.confirm(&temp_id, message)?;
                    },
                    _ => debug!(%room_id, %temp_id, "ack for unknown or resolved send"),
                }
            },
            InboundEvent::TypingChanged { user_id, typing } => {
                self.publish(ChatEvent::TypingChanged { room_id: room_id.clone(), user_id, typing });
            },
            InboundEvent::ConnectionChanged(state) => {
                self.publish(ChatEvent::ConnectionChanged { room_id: room_id.clone(), state });
            },
        }
        Ok(())
    }
}

struct Observer<E, C> {
    sessions: SessionManager<E, C>,
    pump: Option<JoinHandle<()>>,
}

impl<E, C> Observer<E, C> {
    fn stop_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl<E, C> Drop for Observer<E, C> {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Orchestrates fetches, sends and realtime reconciliation.
///
/// Network calls are async and suspend the caller. Store calls are
/// synchronous and short. One engine serves one signed-in user.
pub struct SyncEngine<S, R, C, E> {
    env: E,
    rest: R,
    auth: AuthContext,
    config: SyncConfig,
    reconciler: Reconciler<S>,
    observer: Mutex<Observer<E, C>>,
}

impl<S, R, C, E> SyncEngine<S, R, C, E>
where
    S: MessageStore,
    R: RestClient,
    C: Connector,
    E: Environment,
{
    /// Create an engine. Nothing connects until [`SyncEngine::observe_room`].
    pub fn new(env: E, rest: R, store: S, connector: C, auth: AuthContext, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let sessions = SessionManager::new(env.clone(), connector, config.clone());

        Self {
            env,
            rest,
            auth,
            config,
            reconciler: Reconciler { store, events },
            observer: Mutex::new(Observer { sessions, pump: None }),
        }
    }

    /// Subscribe to every event the engine publishes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.reconciler.events.subscribe()
    }

    /// The local cache.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.reconciler.store
    }

    /// Send a message optimistically.
    ///
    /// The message is cached as `Pending` before the REST call. On success the
    /// pending entry is replaced by the confirmed message, which is returned.
    ///
    /// # Errors
    ///
    /// - `SyncError::SendFailed` if the REST send fails; the message stays
    ///   cached as `Failed`. A send the realtime channel already confirmed
    ///   returns the confirmed message instead
    /// - `SyncError::Unauthorized` if the server rejects the credentials
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Message, SyncError> {
        let send = PendingSend {
            temp_id: TempId::generate(&self.env),
            room_id: room_id.clone(),
            content: content.into(),
            attachments,
            created_at: self.env.wall_clock_millis(),
        };
        self.deliver(send).await
    }

    /// Send a failed message again under a fresh temp id.
    ///
    /// The failed entry is discarded first, so the room never shows both.
    ///
    /// # Errors
    ///
    /// - `SyncError::Store(StoreError::NotFound)` if `temp_id` is not a failed
    ///   send
    /// - everything [`SyncEngine::send_message`] returns
    pub async fn retry_send(&self, temp_id: &TempId) -> Result<Message, SyncError> {
        let failed = self
            .store()
            .pending(temp_id)?
            .filter(|entry| entry.state == DeliveryState::Failed)
            .ok_or_else(|| StoreError::NotFound(format!("failed message {temp_id}")))?;

        self.discard_failed(temp_id)?;
        info!(room_id = %failed.room_id, %temp_id, "retrying failed send");

        let send = PendingSend {
            temp_id: TempId::generate(&self.env),
            room_id: failed.room_id,
            content: failed.content,
            attachments: failed.attachments,
            created_at: self.env.wall_clock_millis(),
        };
        self.deliver(send).await
    }

    /// Drop a failed message from the cache.
    pub fn discard_failed(&self, temp_id: &TempId) -> Result<(), SyncError> {
        let discarded = self.store().discard_failed(temp_id)?;
        self.reconciler.publish(ChatEvent::MessageDiscarded {
            room_id: discarded.room_id,
            temp_id: temp_id.clone(),
        });
        Ok(())
    }

    async fn deliver(&self, send: PendingSend) -> Result<Message, SyncError> {
        let temp_id = send.temp_id.clone();
        let room_id = send.room_id.clone();
        let body = SendMessageBody {
            content: send.content.clone(),
            attachments: send.attachments.iter().cloned().map(AttachmentPayload::from).collect(),
            client_temp_id: temp_id.to_string(),
        };

        let pending = self.store().upsert_pending(send, self.auth.user.clone())?;
        debug!(%room_id, %temp_id, "message pending");
        self.reconciler.publish(ChatEvent::MessagePending(pending));

        let response = self
            .rest
            .request(Endpoint::SendMessage { room: room_id.clone(), body })
            .await
            .and_then(RestResponse::into_message);

        match response {
            Ok(payload) => self.reconciler.confirm(&temp_id, payload.into()),
            Err(err) => {
                warn!(%room_id, %temp_id, error = %err, "send failed");
                let reason = err.to_string();

                let outcome = PendingOutcome::Failed(reason.clone());
                match self.store().resolve_pending(&temp_id, outcome)? {
                    Some(Resolution::AlreadyConfirmed(confirmed)) => {
                        info!(%room_id, %temp_id, id = ?confirmed.id, "send already confirmed by realtime");
                        return Ok(confirmed);
                    },
                    Some(Resolution::Failed(failed)) => {
                        self.reconciler.publish(ChatEvent::MessageFailed(failed));
                    },
                    Some(Resolution::Confirmed { .. }) | None => {},
                }

                Err(match err {
                    HttpError::Unauthorized => SyncError::Unauthorized(reason),
                    _ => SyncError::SendFailed { temp_id, reason },
                })
            },
        }
    }

    /// Fetch the newest page of a room, or the page before `before`.
    ///
    /// Returns the room's cached messages after the merge, newest first.
    ///
    /// # Errors
    ///
    /// - `SyncError::RoomNotFound` on 404
    /// - `SyncError::Unauthorized` on 401/403
    /// - `SyncError::FetchFailed` on other client errors
    pub async fn fetch_messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
    ) -> Result<Fetched<Message>, SyncError> {
        let endpoint =
            Endpoint::History { room: room_id.clone(), before, limit: self.config.page_size };

        match self.rest.request(endpoint).await.and_then(RestResponse::into_messages) {
            Ok(payloads) => {
                let batch = page_batch(room_id, payloads);
                let report = self.store().merge_page(room_id, batch)?;
                debug!(%room_id, inserted = report.inserted.len(), "history page merged");
                self.reconciler.apply_report(&report);

                let items = self.store().query_messages(room_id, before, self.config.page_size)?;
                Ok(Fetched::fresh(items))
            },
            Err(err) => {
                let reason = self.degrade(Some(room_id), err)?;
                let items = self.store().query_messages(room_id, before, self.config.page_size)?;
                Ok(Fetched::stale(items, reason))
            },
        }
    }

    /// Fetch the room list, most recently active first.
    ///
    /// # Errors
    ///
    /// - `SyncError::Unauthorized` on 401/403
    /// - `SyncError::FetchFailed` on other client errors
    pub async fn fetch_rooms(&self) -> Result<Fetched<Room>, SyncError> {
        match self.rest.request(Endpoint::ListRooms).await.and_then(RestResponse::into_rooms) {
            Ok(payloads) => {
                let previous: HashMap<RoomId, Room> =
                    self.store().query_rooms()?.into_iter().map(|r| (r.id.clone(), r)).collect();

                let stored = self.store().upsert_rooms(payloads.into_iter().map(Room::from).collect())?;
                for room in stored {
                    if previous.get(&room.id) != Some(&room) {
                        self.reconciler.publish(ChatEvent::RoomUpdated(room));
                    }
                }

                Ok(Fetched::fresh(self.store().query_rooms()?))
            },
            Err(err) => {
                let reason = self.degrade(None, err)?;
                Ok(Fetched::stale(self.store().query_rooms()?, reason))
            },
        }
    }

    /// Create a room on the server and cache it.
    ///
    /// # Errors
    ///
    /// - `SyncError::Unauthorized` on 401/403
    /// - `SyncError::Http` on any other failure
    pub async fn create_room(
        &self,
        title: impl Into<String>,
        member_ids: Vec<String>,
    ) -> Result<Room, SyncError> {
        let body = CreateRoomBody { title: title.into(), member_ids };

        let payload = self
            .rest
            .request(Endpoint::CreateRoom(body))
            .await
            .and_then(RestResponse::into_room)
            .map_err(|err| match err {
                HttpError::Unauthorized => SyncError::Unauthorized(err.to_string()),
                other => SyncError::Http(other),
            })?;

        let room = self.store().upsert_room(payload.into())?;
        info!(room_id = %room.id, "room created");
        self.reconciler.publish(ChatEvent::RoomUpdated(room.clone()));
        Ok(room)
    }

    /// Page further back from `before_id`.
    ///
    /// Returns only messages strictly older than the anchor that were not
    /// cached before the call, newest first. When the server cannot be
    /// reached the result is stale and empty, since everything cached was
    /// already handed out by earlier pages.
    ///
    /// # Errors
    ///
    /// - `SyncError::StaleCursor` if `before_id` is not cached
    /// - the same errors as [`SyncEngine::fetch_messages`]
    pub async fn load_more(
        &self,
        room_id: &RoomId,
        before_id: &MessageId,
    ) -> Result<Fetched<Message>, SyncError> {
        let anchor = self.store().find_message(room_id, before_id)?.ok_or_else(|| {
            SyncError::StaleCursor { room_id: room_id.clone(), message_id: before_id.clone() }
        })?;
        let before = anchor.created_at;

        let endpoint = Endpoint::History {
            room: room_id.clone(),
            before: Some(before),
            limit: self.config.page_size,
        };

        match self.rest.request(endpoint).await.and_then(RestResponse::into_messages) {
            Ok(payloads) => {
                let batch = page_batch(room_id, payloads);
                let report = self.store().merge_page(room_id, batch)?;
                self.reconciler.apply_report(&report);

                let mut items: Vec<Message> = report
                    .inserted
                    .into_iter()
                    .filter(|m| &m.room_id == room_id && m.created_at < before)
                    .collect();
                items.sort_by(|a, b| {
                    b.created_at.cmp(&a.created_at).then_with(|| b.key().cmp(&a.key()))
                });
                debug!(%room_id, before, loaded = items.len(), "older page loaded");

                Ok(Fetched::fresh(items))
            },
            Err(err) => {
                let reason = self.degrade(Some(room_id), err)?;
                Ok(Fetched::stale(Vec::new(), reason))
            },
        }
    }

    /// Start receiving realtime events for `room_id`.
    ///
    /// Closes the session of any other room first. Observing the room that is
    /// already observed keeps the existing session.
    pub async fn observe_room(&self, room_id: &RoomId) {
        let mut observer = self.observer.lock().await;
        if observer.sessions.active_room() == Some(room_id) {
            return;
        }

        observer.stop_pump();
        let Some(mut events) =
            observer.sessions.subscribe(room_id.clone(), self.auth.handshake_headers()).await
        else {
            return;
        };

        let reconciler = self.reconciler.clone();
        let room = room_id.clone();
        observer.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(err) = reconciler.handle(&room, event) {
                    warn!(room_id = %room, error = %err, "failed to apply realtime event");
                }
            }
        }));
    }

    /// Close the realtime session, if any. Safe to call repeatedly.
    pub async fn stop_observing(&self) {
        let mut observer = self.observer.lock().await;
        observer.stop_pump();
        observer.sessions.unsubscribe().await;
    }

    /// Room currently observed.
    pub async fn observed_room(&self) -> Option<RoomId> {
        self.observer.lock().await.sessions.active_room().cloned()
    }

    /// Push a typing indicator to the observed room.
    ///
    /// # Errors
    ///
    /// - `SyncError::Transport` if `room_id` is not observed or its channel is
    ///   not connected
    pub async fn set_typing(&self, room_id: &RoomId, typing: bool) -> Result<(), SyncError> {
        let observer = self.observer.lock().await;
        observer.sessions.send_typing(room_id, &self.auth.user.id, typing).await?;
        Ok(())
    }

    /// Reconnect the observed room's channel, resetting its retry budget.
    pub async fn reconnect(&self) {
        self.observer.lock().await.sessions.reconnect().await;
    }

    /// Connection state of the observed room.
    pub async fn connection_state(&self) -> ConnectionState {
        self.observer.lock().await.sessions.state()
    }

    /// Decide whether a failed fetch degrades to cached data.
    ///
    /// Returns the degradation reason, or the error to surface.
    fn degrade(&self, room_id: Option<&RoomId>, err: HttpError) -> Result<String, SyncError> {
        match err {
            HttpError::Unauthorized | HttpError::Status { code: 401 | 403, .. } => {
                Err(SyncError::Unauthorized(err.to_string()))
            },
            HttpError::Status { code, .. } if code < 500 => match room_id {
                Some(room_id) if err.is_not_found() => Err(SyncError::RoomNotFound(room_id.clone())),
                _ => Err(SyncError::FetchFailed(err.to_string())),
            },
            other => {
                let reason = other.to_string();
                warn!(room_id = ?room_id, error = %reason, "fetch failed, serving cached data");
                self.reconciler.publish(ChatEvent::FetchFailed {
                    room_id: room_id.cloned(),
                    reason: reason.clone(),
                });
                Ok(reason)
            },
        }
    }
}

/// Convert a history page, dropping messages of other rooms.
fn page_batch(room_id: &RoomId, payloads: Vec<MessagePayload>) -> Vec<Message> {
    let total = payloads.len();
    let batch: Vec<Message> = payloads
        .into_iter()
        .map(Message::from)
        .filter(|message| &message.room_id == room_id)
        .collect();

    if batch.len() != total {
        warn!(%room_id, dropped = total - batch.len(), "history page contained other rooms");
    }
    batch
}

#[cfg(test)]
mod tests {
    use parley_proto::SenderPayload;

    use super::*;
    use crate::store::MemoryStore;

    fn payload(room: &str, id: &str, created_at: u64) -> MessagePayload {
        MessagePayload {
            id: id.to_string(),
            room_id: room.to_string(),
            content: format!("message {id}"),
            created_at,
            sender: SenderPayload { id: "u2".to_string(), name: "Grace".to_string(), avatar: None },
            attachments: vec![],
            client_temp_id: None,
        }
    }

    fn reconciler() -> (Reconciler<MemoryStore>, broadcast::Receiver<ChatEvent>) {
        let (events, rx) = broadcast::channel(16);
        (Reconciler { store: MemoryStore::new(), events }, rx)
    }

    #[test]
    fn page_batch_drops_other_rooms() {
        let room = RoomId::new("r1");
        let batch = page_batch(&room, vec![payload("r1", "m1", 1), payload("r2", "m2", 2)]);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, Some(MessageId::new("m1")));
    }

    #[test]
    fn duplicate_pushes_publish_once() {
        let (reconciler, mut rx) = reconciler();
        let room = RoomId::new("r1");
        let message: Message = payload("r1", "m1", 5).into();

        reconciler.handle(&room, InboundEvent::NewMessage(message.clone())).unwrap();
        reconciler.handle(&room, InboundEvent::NewMessage(message)).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ChatEvent::MessageAdded(_)));
        assert!(matches!(rx.try_recv().unwrap(), ChatEvent::RoomUpdated(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ack_confirms_pending_send_in_place() {
        let (reconciler, mut rx) = reconciler();
        let room = RoomId::new("r1");
        let temp_id = TempId::new("tmp-1");
        let sender = parley_core::model::Sender {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar: None,
        };
        reconciler
            .store
            .upsert_pending(
                PendingSend {
                    temp_id: temp_id.clone(),
                    room_id: room.clone(),
                    content: "hello".to_string(),
                    attachments: vec![],
                    created_at: 10,
                },
                sender,
            )
            .unwrap();

        reconciler
            .handle(
                &room,
                InboundEvent::Ack {
                    temp_id: temp_id.clone(),
                    message_id: MessageId::new("m7"),
                    created_at: 12,
                },
            )
            .unwrap();

        match rx.try_recv().unwrap() {
            ChatEvent::MessageConfirmed { temp_id: resolved, message } => {
                assert_eq!(resolved, temp_id);
                assert_eq!(message.id, Some(MessageId::new("m7")));
                assert_eq!(message.content, "hello");
                assert!(message.is_confirmed());
            },
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert!(reconciler.store.pending(&temp_id).unwrap().is_none());
    }

    #[test]
    fn late_confirmation_after_ack_publishes_nothing() {
        let (reconciler, mut rx) = reconciler();
        let room = RoomId::new("r1");
        let temp_id = TempId::new("tmp-1");
        let sender = parley_core::model::Sender {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar: None,
        };
        reconciler
            .store
            .upsert_pending(
                PendingSend {
                    temp_id: temp_id.clone(),
                    room_id: room.clone(),
                    content: "hello".to_string(),
                    attachments: vec![],
                    created_at: 10,
                },
                sender,
            )
            .unwrap();

        reconciler
            .handle(
                &room,
                InboundEvent::Ack {
                    temp_id: temp_id.clone(),
                    message_id: MessageId::new("m7"),
                    created_at: 12,
                },
            )
            .unwrap();
        assert!(matches!(rx.try_recv().unwrap(), ChatEvent::MessageConfirmed { .. }));
        match rx.try_recv().unwrap() {
            ChatEvent::RoomUpdated(updated) => {
                assert_eq!(updated.id, room);
                assert_eq!(updated.last_activity, 12);
            },
            other => panic!("expected room update, got {other:?}"),
        }

        // The REST response for the same send lands afterwards
        let mut response: Message = payload("r1", "m7", 12).into();
        response.content = "hello".to_string();
        let confirmed = reconciler.confirm(&temp_id, response).unwrap();

        assert_eq!(confirmed.id, Some(MessageId::new("m7")));
        assert!(rx.try_recv().is_err());
        assert_eq!(reconciler.store.message_count().unwrap(), 1);
    }

    #[test]
    fn acks_for_other_rooms_are_ignored() {
        let (reconciler, mut rx) = reconciler();
        let temp_id = TempId::new("tmp-1");
        let sender = parley_core::model::Sender {
            id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar: None,
        };
        reconciler
            .store
            .upsert_pending(
                PendingSend {
                    temp_id: temp_id.clone(),
                    room_id: RoomId::new("r1"),
                    content: "hello".to_string(),
                    attachments: vec![],
                    created_at: 10,
                },
                sender,
            )
            .unwrap();

        reconciler
            .handle(
                &RoomId::new("r2"),
                InboundEvent::Ack {
                    temp_id: temp_id.clone(),
                    message_id: MessageId::new("m7"),
                    created_at: 12,
                },
            )
            .unwrap();

        assert!(rx.try_recv().is_err());
        assert!(reconciler.store.pending(&temp_id).unwrap().is_some());
    }

    #[test]
    fn stale_fetches_report_their_reason() {
        let fetched: Fetched<Message> = Fetched::stale(vec![], "offline".to_string());
        assert!(fetched.is_stale());
        assert!(!Fetched::<Message>::fresh(vec![]).is_stale());
    }
}
