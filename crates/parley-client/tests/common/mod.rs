//! Shared fixtures for the sync integration tests.

#![allow(dead_code)]

use std::time::Duration;

use parley_client::{
    AuthContext, ChatEvent, ChatGateway, ConnectionState, MemoryStore, RoomStream, SyncConfig,
    model::{RoomId, Sender},
};
use parley_harness::{SimConnector, SimEnv, SimRest};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

pub type SimGateway = ChatGateway<MemoryStore, SimRest, SimConnector, SimEnv>;

/// A gateway wired to simulated collaborators, plus handles to script them.
pub struct World {
    pub gateway: SimGateway,
    pub rest: SimRest,
    pub connector: SimConnector,
    pub store: MemoryStore,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        init_tracing();
        let rest = SimRest::new();
        let connector = SimConnector::new();
        let store = MemoryStore::new();
        let gateway = ChatGateway::new(
            SimEnv::new(),
            rest.clone(),
            store.clone(),
            connector.clone(),
            auth(),
            config,
        );

        Self { gateway, rest, connector, store }
    }

    /// Observe `room` and wait until its channel is connected.
    pub async fn observe_connected(&self, room: &RoomId) -> RoomStream {
        let mut stream = self.gateway.observe(room).await;
        next_matching(&mut stream, |event| {
            matches!(event, ChatEvent::ConnectionChanged { state: ConnectionState::Connected, .. })
        })
        .await;
        stream
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn auth() -> AuthContext {
    AuthContext {
        api_key: "key".to_string(),
        product_id: "prod".to_string(),
        bearer_token: "token".to_string(),
        user: Sender { id: "u1".to_string(), name: "Ada".to_string(), avatar: None },
    }
}

pub fn room(id: &str) -> RoomId {
    RoomId::new(id)
}

/// Next event on `stream` matching `predicate`, skipping the rest.
pub async fn next_matching(
    stream: &mut RoomStream,
    mut predicate: impl FnMut(&ChatEvent) -> bool,
) -> ChatEvent {
    let wait = async {
        loop {
            let event = stream.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(120), wait).await.expect("timed out waiting for event")
}

/// Events already published, without waiting.
pub fn drain(events: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Let spawned tasks run to idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
