//! Public façade.
//!
//! [`ChatGateway`] is the one entry point UI code talks to. The composition
//! root builds it once per signed-in user and hands out clones; there is no
//! global instance.

use std::sync::Arc;

use futures::{Stream, stream};
use parley_core::{
    ConnectionState, Environment,
    model::{Attachment, Message, MessageId, Room, RoomId, TempId},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::{
    config::{AuthContext, SyncConfig},
    error::SyncError,
    event::ChatEvent,
    rest::RestClient,
    store::MessageStore,
    sync::{Fetched, SyncEngine},
    transport::Connector,
};

/// Chat client façade over a [`SyncEngine`].
///
/// Clones share the same engine, cache and realtime session.
pub struct ChatGateway<S, R, C, E> {
    engine: Arc<SyncEngine<S, R, C, E>>,
}

impl<S, R, C, E> Clone for ChatGateway<S, R, C, E> {
    fn clone(&self) -> Self {
        Self { engine: Arc::clone(&self.engine) }
    }
}

impl<S, R, C, E> ChatGateway<S, R, C, E>
where
    S: MessageStore,
    R: RestClient,
    C: Connector,
    E: Environment,
{
    /// Build a gateway and its engine.
    pub fn new(env: E, rest: R, store: S, connector: C, auth: AuthContext, config: SyncConfig) -> Self {
        Self { engine: Arc::new(SyncEngine::new(env, rest, store, connector, auth, config)) }
    }

    /// Fetch the room list. See [`SyncEngine::fetch_rooms`].
    pub async fn fetch_rooms(&self) -> Result<Fetched<Room>, SyncError> {
        self.engine.fetch_rooms().await
    }

    /// Fetch a page of a room. See [`SyncEngine::fetch_messages`].
    pub async fn fetch_messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
    ) -> Result<Fetched<Message>, SyncError> {
        self.engine.fetch_messages(room_id, before).await
    }

    /// Page back from a message. See [`SyncEngine::load_more`].
    pub async fn load_more(
        &self,
        room_id: &RoomId,
        before_id: &MessageId,
    ) -> Result<Fetched<Message>, SyncError> {
        self.engine.load_more(room_id, before_id).await
    }

    /// Send a message. See [`SyncEngine::send_message`].
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<Message, SyncError> {
        self.engine.send_message(room_id, content, attachments).await
    }

    /// Resend a failed message.
    pub async fn retry_send(&self, temp_id: &TempId) -> Result<Message, SyncError> {
        self.engine.retry_send(temp_id).await
    }

    /// Drop a failed message.
    pub fn discard_failed(&self, temp_id: &TempId) -> Result<(), SyncError> {
        self.engine.discard_failed(temp_id)
    }

    /// Create a room.
    pub async fn create_room(
        &self,
        title: impl Into<String>,
        member_ids: Vec<String>,
    ) -> Result<Room, SyncError> {
        self.engine.create_room(title, member_ids).await
    }

    /// Push a typing indicator to the observed room.
    pub async fn set_typing(&self, room_id: &RoomId, typing: bool) -> Result<(), SyncError> {
        self.engine.set_typing(room_id, typing).await
    }

    /// Observe a room's live events.
    ///
    /// The stream is subscribed before the session opens, so it sees the
    /// first connection state change. Observing another room closes this
    /// room's session; the stream then stays quiet until it is dropped.
    pub async fn observe(&self, room_id: &RoomId) -> RoomStream {
        let events = self.engine.subscribe();
        self.engine.observe_room(room_id).await;
        RoomStream { room_id: room_id.clone(), events }
    }

    /// Close the realtime session.
    pub async fn stop_observing(&self) {
        self.engine.stop_observing().await;
    }

    /// Reconnect the observed room after its connection gave up.
    pub async fn reconnect(&self) {
        self.engine.reconnect().await;
    }

    /// Connection state of the observed room.
    pub async fn connection_state(&self) -> ConnectionState {
        self.engine.connection_state().await
    }

    /// Events of every room.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.engine.subscribe()
    }

    /// Cached messages of a room, newest first.
    pub fn messages(
        &self,
        room_id: &RoomId,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Message>, SyncError> {
        Ok(self.engine.store().query_messages(room_id, before, limit)?)
    }

    /// Cached rooms, most recently active first.
    pub fn rooms(&self) -> Result<Vec<Room>, SyncError> {
        Ok(self.engine.store().query_rooms()?)
    }
}

/// Live events of one room.
pub struct RoomStream {
    room_id: RoomId,
    events: broadcast::Receiver<ChatEvent>,
}

impl RoomStream {
    /// Room this stream is filtered to.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Next event of this room.
    ///
    /// Returns `None` once the engine is gone. A subscriber that falls behind
    /// skips the events it missed; the cache still holds them.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.room_id() == Some(&self.room_id) => return Some(event),
                Ok(_) => {},
                Err(RecvError::Lagged(skipped)) => {
                    warn!(room_id = %self.room_id, skipped, "room stream lagged");
                },
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = ChatEvent> + Send {
        stream::unfold(self, |mut events| async move {
            let event = events.recv().await?;
            Some((event, events))
        })
    }
}
