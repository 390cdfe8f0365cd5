//! Simulated REST server.
//!
//! `SimRest` keeps rooms and message history in memory and answers the
//! client's [`Endpoint`]s the way the real API does: history pages newest
//! first, strictly older than `before`; sends get a server id and a
//! `created_at` later than anything already in the room. Tests flip it
//! offline, reject credentials, or queue one-off failures.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use parley_client::{Endpoint, HttpError, RestClient, RestResponse};
use parley_proto::{MessagePayload, RoomPayload, SenderPayload};
use tracing::debug;

use crate::sim_env::BASE_WALL_CLOCK_MILLIS;

/// Simulated REST server.
///
/// Clones share state, so a test keeps one clone for scripting while the
/// client owns another.
#[derive(Clone)]
pub struct SimRest {
    inner: Arc<Mutex<SimRestState>>,
}

struct SimRestState {
    online: bool,
    unauthorized: bool,
    latency: Duration,
    fail_next: VecDeque<HttpError>,
    sender: SenderPayload,
    rooms: BTreeMap<String, RoomPayload>,
    messages: Vec<MessagePayload>,
    calls: Vec<Endpoint>,
    next_id: u64,
    clock: u64,
}

impl SimRest {
    /// An online server with no rooms. Sends are attributed to user `u1`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimRestState {
                online: true,
                unauthorized: false,
                latency: Duration::ZERO,
                fail_next: VecDeque::new(),
                sender: SenderPayload { id: "u1".to_string(), name: "Ada".to_string(), avatar: None },
                rooms: BTreeMap::new(),
                messages: Vec::new(),
                calls: Vec::new(),
                next_id: 1,
                clock: BASE_WALL_CLOCK_MILLIS,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimRestState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the server on or off the network. Offline requests fail with
    /// `HttpError::Unreachable`.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Reject every request with `HttpError::Unauthorized`.
    pub fn reject_auth(&self, reject: bool) {
        self.state().unauthorized = reject;
    }

    /// Delay every response by `latency` (virtual time under a paused clock).
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Fail the next request with `err`. Queued failures apply in order.
    pub fn fail_next(&self, err: HttpError) {
        self.state().fail_next.push_back(err);
    }

    /// Create a room directly on the server.
    pub fn add_room(&self, id: &str, title: &str) -> RoomPayload {
        let mut state = self.state();
        let room = RoomPayload {
            id: id.to_string(),
            title: title.to_string(),
            avatar: None,
            last_activity: 0,
            last_message: None,
        };
        state.rooms.insert(id.to_string(), room.clone());
        room
    }

    /// Post a message from another user directly into server history.
    pub fn seed_message(&self, room_id: &str, id: &str, content: &str, created_at: u64) -> MessagePayload {
        let mut state = self.state();
        let message = MessagePayload {
            id: id.to_string(),
            room_id: room_id.to_string(),
            content: content.to_string(),
            created_at,
            sender: SenderPayload { id: "u2".to_string(), name: "Grace".to_string(), avatar: None },
            attachments: vec![],
            client_temp_id: None,
        };
        state.record(message.clone());
        message
    }

    /// Server history of a room, newest first.
    pub fn messages_in(&self, room_id: &str) -> Vec<MessagePayload> {
        self.state().page(room_id, None, usize::MAX)
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<Endpoint> {
        self.state().calls.clone()
    }

    /// Number of `SendMessage` requests received.
    pub fn send_count(&self) -> usize {
        self.state().calls.iter().filter(|c| matches!(c, Endpoint::SendMessage { .. })).count()
    }

    fn handle(&self, endpoint: Endpoint) -> (Duration, Result<RestResponse, HttpError>) {
        let mut state = self.state();
        state.calls.push(endpoint.clone());
        debug!(method = endpoint.method(), path = %endpoint.path(), "sim rest request");

        let latency = state.latency;
        if let Some(err) = state.fail_next.pop_front() {
            return (latency, Err(err));
        }
        if !state.online {
            return (latency, Err(HttpError::Unreachable("simulated outage".to_string())));
        }
        if state.unauthorized {
            return (latency, Err(HttpError::Unauthorized));
        }

        (latency, state.respond(endpoint))
    }
}

impl Default for SimRest {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRestState {
    fn respond(&mut self, endpoint: Endpoint) -> Result<RestResponse, HttpError> {
        match endpoint {
            Endpoint::ListRooms => {
                let mut rooms: Vec<RoomPayload> = self.rooms.values().cloned().collect();
                rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
                Ok(RestResponse::Rooms(rooms))
            },
            Endpoint::CreateRoom(body) => {
                let id = format!("room-{}", self.allocate_id());
                let room = RoomPayload {
                    id: id.clone(),
                    title: body.title,
                    avatar: None,
                    last_activity: self.tick(),
                    last_message: None,
                };
                self.rooms.insert(id, room.clone());
                Ok(RestResponse::Room(room))
            },
            Endpoint::History { room, before, limit } => {
                self.require_room(room.as_str())?;
                Ok(RestResponse::Messages(self.page(room.as_str(), before, limit)))
            },
            Endpoint::SendMessage { room, body } => {
                self.require_room(room.as_str())?;
                let message = MessagePayload {
                    id: format!("msg-{}", self.allocate_id()),
                    room_id: room.to_string(),
                    content: body.content,
                    created_at: self.tick(),
                    sender: self.sender.clone(),
                    attachments: body.attachments,
                    client_temp_id: Some(body.client_temp_id),
                };
                self.record(message.clone());
                Ok(RestResponse::Message(message))
            },
        }
    }

    fn require_room(&self, room_id: &str) -> Result<(), HttpError> {
        if self.rooms.contains_key(room_id) {
            Ok(())
        } else {
            Err(HttpError::Status { code: 404, message: format!("no room {room_id}") })
        }
    }

    fn page(&self, room_id: &str, before: Option<u64>, limit: usize) -> Vec<MessagePayload> {
        let mut page: Vec<MessagePayload> = self
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && before.is_none_or(|before| m.created_at < before))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        page.truncate(limit);
        page
    }

    fn record(&mut self, message: MessagePayload) {
        self.clock = self.clock.max(message.created_at);
        if let Some(room) = self.rooms.get_mut(&message.room_id) {
            if message.created_at >= room.last_activity {
                room.last_activity = message.created_at;
                room.last_message = Some(message.content.clone());
            }
        }
        self.messages.push(message);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1_000;
        self.clock
    }
}

impl RestClient for SimRest {
    async fn request(&self, endpoint: Endpoint) -> Result<RestResponse, HttpError> {
        let (latency, response) = self.handle(endpoint);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        response
    }
}
