//! Transport driver lifecycle tests.
//!
//! Drive a real `TransportHandle` against the simulated realtime server in
//! paused tokio time, so heartbeats and backoff run in virtual seconds.

use std::time::Duration;

use parley_client::{
    ChannelRequest, ConnectionState, FailureReason, TransportError, TransportHandle,
    model::RoomId,
};
use parley_core::{Backoff, ConnectionConfig};
use parley_harness::{SimConnector, SimEnv};
use parley_proto::{HandshakeHeaders, InboundFrame, OutboundFrame, TypingPayload, channel_path};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn request(room: &str) -> ChannelRequest {
    ChannelRequest {
        room_id: RoomId::new(room),
        path: channel_path("chat", room),
        headers: HandshakeHeaders {
            api_key: "key".to_string(),
            product_id: "prod".to_string(),
            bearer_token: "token".to_string(),
        },
    }
}

fn spawn(
    connector: &SimConnector,
    config: ConnectionConfig,
) -> (TransportHandle, mpsc::Receiver<InboundFrame>) {
    TransportHandle::spawn(SimEnv::new(), connector.clone(), request("r1"), config, 16)
}

async fn wait_for(
    state: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let current = tokio::time::timeout(Duration::from_secs(600), state.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("driver stopped");
    *current
}

/// Let spawned tasks run to idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn heartbeats_keep_the_channel_open() {
    init_tracing();
    let connector = SimConnector::new();
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(handle.state().is_connected());
    assert_eq!(connector.opens("r1"), 1);
    assert_eq!(connector.requests()[0].path, "/chat-r1");

    let pings = connector
        .outbound("r1")
        .iter()
        .filter(|frame| matches!(frame, OutboundFrame::Ping { .. }))
        .count();
    assert!(pings >= 4, "expected a ping every 25s, saw {pings}");
}

#[tokio::test(start_paused = true)]
async fn missing_pong_reconnects() {
    init_tracing();
    let connector = SimConnector::new();
    connector.set_auto_pong(false);
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;
    let reconnecting =
        wait_for(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;
    settle().await;

    assert_eq!(reconnecting, ConnectionState::Reconnecting { attempt: 1 });
    assert_eq!(connector.closes("r1"), 1);

    connector.set_auto_pong(true);
    wait_for(&mut state, |s| s.is_connected()).await;
    assert_eq!(connector.opens("r1"), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_channel_reconnects_with_backoff() {
    init_tracing();
    let connector = SimConnector::new();
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;

    let dropped_at = tokio::time::Instant::now();
    connector.drop_connections("r1");
    wait_for(&mut state, |s| matches!(s, ConnectionState::Reconnecting { attempt: 1 })).await;
    wait_for(&mut state, |s| s.is_connected()).await;

    // Base delay 2s with up to 50% jitter
    let waited = tokio::time::Instant::now() - dropped_at;
    assert!(waited >= Duration::from_secs(2), "reconnected after {waited:?}");
    assert!(waited < Duration::from_secs(4), "reconnected after {waited:?}");
    assert_eq!(connector.opens("r1"), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_is_terminal() {
    init_tracing();
    let connector = SimConnector::new();
    connector.reject_auth(true);
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    let failed = wait_for(&mut state, |s| matches!(s, ConnectionState::Failed(_))).await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(failed, ConnectionState::Failed(FailureReason::AuthRejected));
    assert_eq!(connector.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_after_max_attempts_until_reconnect() {
    init_tracing();
    let connector = SimConnector::new();
    connector.set_offline(true);
    let config = ConnectionConfig {
        backoff: Backoff { max_attempts: 3, ..Backoff::default() },
        ..ConnectionConfig::default()
    };
    let (handle, _frames) = spawn(&connector, config);

    let mut state = handle.watch_state();
    let failed = wait_for(&mut state, |s| matches!(s, ConnectionState::Failed(_))).await;
    assert_eq!(failed, ConnectionState::Failed(FailureReason::RetriesExhausted));
    assert_eq!(connector.requests().len(), 4);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.requests().len(), 4);

    connector.set_offline(false);
    handle.reconnect().await;
    wait_for(&mut state, |s| s.is_connected()).await;
    assert_eq!(connector.requests().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn malformed_and_unknown_frames_are_dropped() {
    init_tracing();
    let connector = SimConnector::new();
    let (handle, mut frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;

    connector.push_raw("r1", b"not json");
    connector.push_raw("r1", br#"{"type":"reaction","room_id":"r1","emoji":"+1"}"#);
    connector.push_raw("r1", br#"{"type":"typing","room_id":"r1"}"#);
    connector.push_typing("r1", "u2", true);

    let frame = frames.recv().await.expect("frame");
    assert_eq!(
        frame,
        InboundFrame::Typing(TypingPayload {
            room_id: "r1".to_string(),
            user_id: "u2".to_string(),
            typing: true,
        })
    );
    assert!(handle.state().is_connected());
    assert_eq!(connector.opens("r1"), 1);
}

#[tokio::test(start_paused = true)]
async fn sends_fail_fast_while_disconnected() {
    init_tracing();
    let connector = SimConnector::new();
    connector.set_offline(true);
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

    let typing = OutboundFrame::Typing(TypingPayload {
        room_id: "r1".to_string(),
        user_id: "u1".to_string(),
        typing: true,
    });
    let err = handle.send(typing).await.unwrap_err();
    assert!(matches!(err, TransportError::NetworkUnavailable(_)));
}

#[tokio::test(start_paused = true)]
async fn outbound_frames_reach_the_server() {
    init_tracing();
    let connector = SimConnector::new();
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;

    let typing = OutboundFrame::Typing(TypingPayload {
        room_id: "r1".to_string(),
        user_id: "u1".to_string(),
        typing: true,
    });
    handle.send(typing.clone()).await.unwrap();
    settle().await;

    assert!(connector.outbound("r1").contains(&typing));
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_channel_once() {
    init_tracing();
    let connector = SimConnector::new();
    let (handle, _frames) = spawn(&connector, ConnectionConfig::default());

    let mut state = handle.watch_state();
    wait_for(&mut state, |s| s.is_connected()).await;

    handle.shutdown(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    assert_eq!(connector.closes("r1"), 1);
    assert_eq!(connector.live("r1"), 0);
}
