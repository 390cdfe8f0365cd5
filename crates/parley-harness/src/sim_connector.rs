//! Simulated realtime server.
//!
//! Every channel `SimConnector` opens is an in-process mpsc pair with a small
//! server task behind it. The task answers pings with pongs (unless disabled),
//! records every outbound frame, and counts the channel as closed once the
//! client drops its sending half. Tests push frames into a room, drop live
//! channels, and fail or reject future opens.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_client::{ChannelRequest, Connector, SocketChannels, TransportError};
use parley_proto::{AckPayload, InboundFrame, MessagePayload, OutboundFrame, TypingPayload};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Simulated realtime server.
///
/// Clones share state.
#[derive(Clone)]
pub struct SimConnector {
    inner: Arc<Mutex<SimConnectorState>>,
}

struct SimConnectorState {
    offline: bool,
    reject_auth: bool,
    auto_pong: bool,
    fail_next: u32,
    next_channel: u64,
    requests: Vec<ChannelRequest>,
    rooms: HashMap<String, RoomChannels>,
}

#[derive(Default)]
struct RoomChannels {
    opens: u32,
    closes: u32,
    live: HashMap<u64, mpsc::Sender<Result<Vec<u8>, TransportError>>>,
    outbound: Vec<OutboundFrame>,
}

impl SimConnector {
    /// An online server that answers pings.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimConnectorState {
                offline: false,
                reject_auth: false,
                auto_pong: true,
                fail_next: 0,
                next_channel: 1,
                requests: Vec::new(),
                rooms: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimConnectorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every open with `NetworkUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Refuse every open with `AuthRejected`.
    pub fn reject_auth(&self, reject: bool) {
        self.state().reject_auth = reject;
    }

    /// Fail the next `count` opens with `NetworkUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Answer pings with pongs. On by default.
    pub fn set_auto_pong(&self, auto_pong: bool) {
        self.state().auto_pong = auto_pong;
    }

    /// Push a raw frame to every live channel of `room_id`.
    ///
    /// Returns the number of channels it reached.
    pub fn push_raw(&self, room_id: &str, bytes: &[u8]) -> usize {
        let state = self.state();
        let Some(room) = state.rooms.get(room_id) else {
            return 0;
        };

        room.live.values().filter(|tx| tx.try_send(Ok(bytes.to_vec())).is_ok()).count()
    }

    /// Push a frame to every live channel of `room_id`.
    pub fn push(&self, room_id: &str, frame: &InboundFrame) -> usize {
        match serde_json::to_vec(frame) {
            Ok(bytes) => self.push_raw(room_id, &bytes),
            Err(err) => {
                warn!(error = %err, "failed to encode simulated frame");
                0
            },
        }
    }

    /// Push a `new_message` frame to the message's room.
    pub fn push_message(&self, message: &MessagePayload) -> usize {
        self.push(&message.room_id, &InboundFrame::NewMessage(message.clone()))
    }

    /// Push a `typing` frame.
    pub fn push_typing(&self, room_id: &str, user_id: &str, typing: bool) -> usize {
        let payload = TypingPayload {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            typing,
        };
        self.push(room_id, &InboundFrame::Typing(payload))
    }

    /// Push an `ack` frame.
    pub fn push_ack(&self, room_id: &str, temp_id: &str, message_id: &str, created_at: u64) -> usize {
        let payload = AckPayload {
            room_id: room_id.to_string(),
            client_temp_id: temp_id.to_string(),
            message_id: message_id.to_string(),
            created_at,
        };
        self.push(room_id, &InboundFrame::Ack(payload))
    }

    /// Break every live channel of `room_id` with a network error.
    pub fn drop_connections(&self, room_id: &str) {
        let mut state = self.state();
        if let Some(room) = state.rooms.get_mut(room_id) {
            for (_, tx) in room.live.drain() {
                let _ = tx.try_send(Err(TransportError::NetworkUnavailable(
                    "simulated connection reset".to_string(),
                )));
            }
        }
    }

    /// Channels opened for `room_id` so far.
    pub fn opens(&self, room_id: &str) -> u32 {
        self.state().rooms.get(room_id).map_or(0, |r| r.opens)
    }

    /// Channels of `room_id` the client has closed so far.
    pub fn closes(&self, room_id: &str) -> u32 {
        self.state().rooms.get(room_id).map_or(0, |r| r.closes)
    }

    /// Channels of `room_id` currently open.
    pub fn live(&self, room_id: &str) -> usize {
        self.state().rooms.get(room_id).map_or(0, |r| r.live.len())
    }

    /// Frames the client sent on channels of `room_id`.
    pub fn outbound(&self, room_id: &str) -> Vec<OutboundFrame> {
        self.state().rooms.get(room_id).map(|r| r.outbound.clone()).unwrap_or_default()
    }

    /// Every open attempt, including refused ones.
    pub fn requests(&self) -> Vec<ChannelRequest> {
        self.state().requests.clone()
    }

    fn accept(&self, request: ChannelRequest) -> Result<SocketChannels, TransportError> {
        let mut state = self.state();
        state.requests.push(request.clone());

        if state.reject_auth {
            return Err(TransportError::AuthRejected("simulated 401".to_string()));
        }
        if state.offline {
            return Err(TransportError::NetworkUnavailable("simulated outage".to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::NetworkUnavailable("simulated refusal".to_string()));
        }

        let channel = state.next_channel;
        state.next_channel += 1;

        let (to_server, outbound) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound, from_server) = mpsc::channel(CHANNEL_CAPACITY);

        let room_id = request.room_id.to_string();
        let room = state.rooms.entry(room_id.clone()).or_default();
        room.opens += 1;
        room.live.insert(channel, inbound.clone());
        drop(state);

        debug!(%room_id, channel, "sim channel opened");
        tokio::spawn(serve(Arc::clone(&self.inner), room_id, channel, outbound, inbound));

        Ok(SocketChannels { to_server, from_server, abort: None })
    }
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SimConnector {
    async fn open(&self, request: ChannelRequest) -> Result<SocketChannels, TransportError> {
        self.accept(request)
    }
}

async fn serve(
    state: Arc<Mutex<SimConnectorState>>,
    room_id: String,
    channel: u64,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    inbound: mpsc::Sender<Result<Vec<u8>, TransportError>>,
) {
    while let Some(bytes) = outbound.recv().await {
        let frame: OutboundFrame = match serde_json::from_slice(&bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%room_id, error = %err, "sim server received malformed frame");
                continue;
            },
        };

        let auto_pong = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = guard.rooms.get_mut(&room_id) {
                room.outbound.push(frame.clone());
            }
            guard.auto_pong
        };

        let OutboundFrame::Ping { nonce } = frame else { continue };
        if auto_pong {
            if let Ok(pong) = serde_json::to_vec(&InboundFrame::Pong { nonce }) {
                let _ = inbound.try_send(Ok(pong));
            }
        }
    }

    let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(room) = guard.rooms.get_mut(&room_id) {
        room.closes += 1;
        room.live.remove(&channel);
    }
    debug!(%room_id, channel, "sim channel closed");
}
