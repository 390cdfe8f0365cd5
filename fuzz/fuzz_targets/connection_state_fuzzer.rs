//! Fuzz target for the realtime connection state machine
//!
//! # Invariants
//!
//! - The failure counter never exceeds `max_attempts + 1`
//! - `Failed` and `Disconnected` never open a channel from `tick`
//! - Every `Open` lands in `Connecting`
//! - A pong never panics, whatever the nonce

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{
    Backoff, ConnectionAction, ConnectionConfig, ConnectionState, TransportConnection,
    TransportError,
};

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Connect,
    Reconnect,
    Close,
    HandshakeOk,
    HandshakeFailed { auth: bool },
    SocketFailed,
    Pong(u64),
    Tick { advance_ms: u16, entropy: u64 },
}

fuzz_target!(|input: (u8, Vec<Op>)| {
    let (max_attempts, ops) = input;
    let config = ConnectionConfig {
        backoff: Backoff { max_attempts: u32::from(max_attempts % 8), ..Backoff::default() },
        ..ConnectionConfig::default()
    };
    let limit = config.backoff.max_attempts + 1;

    let mut now = Instant::now();
    let mut conn: TransportConnection = TransportConnection::new(config);

    for op in ops {
        let before = conn.state();
        let ticked = matches!(op, Op::Tick { .. });

        let actions = match op {
            Op::Connect => conn.connect(now),
            Op::Reconnect => conn.reconnect(now),
            Op::Close => conn.close(),
            Op::HandshakeOk => conn.handshake_succeeded(now),
            Op::HandshakeFailed { auth } => {
                let err = if auth {
                    TransportError::AuthRejected("401".to_string())
                } else {
                    TransportError::NetworkUnavailable("refused".to_string())
                };
                conn.handshake_failed(&err, now, 0)
            },
            Op::SocketFailed => conn.socket_failed(
                &TransportError::NetworkUnavailable("reset".to_string()),
                now,
                0,
            ),
            Op::Pong(nonce) => {
                conn.handle_pong(nonce);
                Vec::new()
            },
            Op::Tick { advance_ms, entropy } => {
                now += Duration::from_millis(u64::from(advance_ms) * 100);
                conn.tick(now, entropy)
            },
        };

        assert!(conn.failures() <= limit, "failures {} over {limit}", conn.failures());

        let opened = actions.iter().any(|a| matches!(a, ConnectionAction::Open));
        if opened {
            assert_eq!(conn.state(), ConnectionState::Connecting);
        }
        if ticked && matches!(before, ConnectionState::Failed(_) | ConnectionState::Disconnected) {
            assert!(!opened, "tick opened a channel from {before:?}");
        }
    }
});
