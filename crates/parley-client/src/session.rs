//! Room-scoped realtime sessions.
//!
//! A [`RoomSession`] binds one transport to one room and turns its raw frames
//! into [`InboundEvent`]s. The [`SessionManager`] keeps at most one session
//! alive per client.
//!
//! # Invariants
//!
//! - Events from a session only ever concern that session's room. Frames for
//!   any other room are dropped before they become events.
//! - Opening a session for a new room tears the previous one down first, so
//!   two rooms are never connected at the same time.

use parley_core::{
    ConnectionState, Environment, TransportError,
    model::{Message, MessageId, RoomId, TempId},
};
use parley_proto::{HandshakeHeaders, InboundFrame, OutboundFrame, TypingPayload, channel_path};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    config::SyncConfig,
    transport::{ChannelRequest, Connector, TransportHandle},
};

/// Typed events of one room's realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A confirmed message was pushed
    NewMessage(Message),

    /// A user started or stopped typing
    TypingChanged {
        /// Typing user
        user_id: String,
        /// `true` while typing
        typing: bool,
    },

    /// The server confirmed one of our sends
    Ack {
        /// Temp id of the send
        temp_id: TempId,
        /// Server-assigned id
        message_id: MessageId,
        /// Server-assigned creation time
        created_at: u64,
    },

    /// The session's connection changed state
    ConnectionChanged(ConnectionState),
}

impl InboundEvent {
    /// Convert a decoded frame into an event for `room_id`.
    ///
    /// Returns `None` for frames of other rooms and for connection-level
    /// frames.
    #[must_use]
    pub fn from_frame(room_id: &RoomId, frame: InboundFrame) -> Option<Self> {
        if frame.room_id() != Some(room_id.as_str()) {
            return None;
        }

        match frame {
            InboundFrame::NewMessage(payload) => Some(Self::NewMessage(payload.into())),
            InboundFrame::Typing(payload) => {
                Some(Self::TypingChanged { user_id: payload.user_id, typing: payload.typing })
            },
            InboundFrame::Ack(payload) => Some(Self::Ack {
                temp_id: TempId::new(payload.client_temp_id),
                message_id: MessageId::new(payload.message_id),
                created_at: payload.created_at,
            }),
            InboundFrame::Pong { .. } | InboundFrame::Unknown => None,
        }
    }
}

/// A live realtime subscription to one room.
pub struct RoomSession {
    room_id: RoomId,
    transport: TransportHandle,
    forwarder: JoinHandle<()>,
}

impl RoomSession {
    /// Connect to `room_id` and start forwarding its events.
    pub fn open<E, C>(
        env: E,
        connector: C,
        room_id: RoomId,
        headers: HandshakeHeaders,
        config: &SyncConfig,
    ) -> (Self, mpsc::Receiver<InboundEvent>)
    where
        E: Environment,
        C: Connector,
    {
        let request = ChannelRequest {
            path: channel_path(&config.namespace, room_id.as_str()),
            room_id: room_id.clone(),
            headers,
        };
        let (transport, mut frames) = TransportHandle::spawn(
            env,
            connector,
            request,
            config.connection.clone(),
            config.frame_buffer,
        );

        let (events_tx, events_rx) = mpsc::channel(config.frame_buffer.max(1));
        let mut state = transport.watch_state();
        let scope = room_id.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frames.recv() => {
                        let Some(frame) = frame else { break };
                        let kind = frame.kind();
                        match InboundEvent::from_frame(&scope, frame) {
                            Some(event) => {
                                if events_tx.send(event).await.is_err() {
                                    break;
                                }
                            },
                            None => debug!(room_id = %scope, kind, "dropping frame for another room"),
                        }
                    },
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *state.borrow_and_update();
                        if events_tx.send(InboundEvent::ConnectionChanged(current)).await.is_err() {
                            break;
                        }
                    },
                }
            }
        });

        (Self { room_id, transport, forwarder }, events_rx)
    }

    /// Room this session serves.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Push a frame on this session's channel.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.transport.send(frame).await
    }

    /// Reconnect this session's transport.
    pub async fn reconnect(&self) {
        self.transport.reconnect().await;
    }

    /// Stop forwarding and release the transport.
    pub async fn close(self, timeout: std::time::Duration) {
        self.forwarder.abort();
        self.transport.shutdown(timeout).await;
    }
}

/// Owner of the client's single active session.
pub struct SessionManager<E, C> {
    env: E,
    connector: C,
    config: SyncConfig,
    active: Option<RoomSession>,
}

impl<E: Environment, C: Connector> SessionManager<E, C> {
    /// Create a manager with no active session.
    pub fn new(env: E, connector: C, config: SyncConfig) -> Self {
        Self { env, connector, config, active: None }
    }

    /// Subscribe to `room_id`.
    ///
    /// Returns the new session's event receiver, or `None` if `room_id` is
    /// already the active room and its session is reused. A session for a
    /// different room is closed before the new one opens.
    pub async fn subscribe(
        &mut self,
        room_id: RoomId,
        headers: HandshakeHeaders,
    ) -> Option<mpsc::Receiver<InboundEvent>> {
        if self.active.as_ref().is_some_and(|s| s.room_id == room_id) {
            debug!(%room_id, "reusing active session");
            return None;
        }

        self.unsubscribe().await;

        info!(%room_id, "opening room session");
        let (session, events) = RoomSession::open(
            self.env.clone(),
            self.connector.clone(),
            room_id,
            headers,
            &self.config,
        );
        self.active = Some(session);
        Some(events)
    }

    /// Close the active session, if any.
    pub async fn unsubscribe(&mut self) {
        if let Some(session) = self.active.take() {
            info!(room_id = %session.room_id, "closing room session");
            session.close(self.config.shutdown_timeout).await;
        }
    }

    /// Room of the active session.
    #[must_use]
    pub fn active_room(&self) -> Option<&RoomId> {
        self.active.as_ref().map(RoomSession::room_id)
    }

    /// Connection state of the active session, `Disconnected` without one.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.active.as_ref().map_or(ConnectionState::Disconnected, RoomSession::state)
    }

    /// Push a typing indicator for `room_id` on the active session.
    ///
    /// # Errors
    ///
    /// - `TransportError::NetworkUnavailable` if `room_id` is not the active
    ///   room or its channel is not connected
    pub async fn send_typing(
        &self,
        room_id: &RoomId,
        user_id: &str,
        typing: bool,
    ) -> Result<(), TransportError> {
        let session = self
            .active
            .as_ref()
            .filter(|s| &s.room_id == room_id)
            .ok_or_else(|| TransportError::NetworkUnavailable(format!("not observing {room_id}")))?;

        session
            .send(OutboundFrame::Typing(TypingPayload {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                typing,
            }))
            .await
    }

    /// Reconnect the active session's transport.
    pub async fn reconnect(&self) {
        if let Some(session) = &self.active {
            session.reconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{AckPayload, MessagePayload, SenderPayload};

    use super::*;

    fn message_frame(room: &str) -> InboundFrame {
        InboundFrame::NewMessage(MessagePayload {
            id: "m1".to_string(),
            room_id: room.to_string(),
            content: "hi".to_string(),
            created_at: 10,
            sender: SenderPayload { id: "u2".to_string(), name: "Grace".to_string(), avatar: None },
            attachments: vec![],
            client_temp_id: None,
        })
    }

    #[test]
    fn frames_for_other_rooms_are_dropped() {
        let room = RoomId::new("a");

        assert!(InboundEvent::from_frame(&room, message_frame("b")).is_none());
        assert!(matches!(
            InboundEvent::from_frame(&room, message_frame("a")),
            Some(InboundEvent::NewMessage(m)) if m.id == Some(MessageId::new("m1"))
        ));
    }

    #[test]
    fn acks_become_typed_events() {
        let frame = InboundFrame::Ack(AckPayload {
            room_id: "a".to_string(),
            client_temp_id: "tmp-1".to_string(),
            message_id: "m9".to_string(),
            created_at: 42,
        });

        assert_eq!(
            InboundEvent::from_frame(&RoomId::new("a"), frame),
            Some(InboundEvent::Ack {
                temp_id: TempId::new("tmp-1"),
                message_id: MessageId::new("m9"),
                created_at: 42,
            })
        );
    }

    #[test]
    fn connection_frames_are_not_events() {
        let room = RoomId::new("a");
        assert!(InboundEvent::from_frame(&room, InboundFrame::Pong { nonce: 1 }).is_none());
        assert!(InboundEvent::from_frame(&room, InboundFrame::Unknown).is_none());
    }
}
