//! Realtime transport state machine.
//!
//! Manages the lifecycle of one duplex channel: handshake, heartbeats,
//! reconnect with backoff, and explicit close. Uses the action pattern:
//! methods take time (and entropy for jitter) as input and return actions for
//! the driver to execute. The state machine itself performs no I/O.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ handshake ok ┌───────────┐
//! │ Disconnected │────────>│ Connecting │─────────────>│ Connected │
//! └──────────────┘         └────────────┘              └───────────┘
//!        ^                    ^      │                       │
//!        │ close       backoff│      │ error/timeout         │ error/pong timeout
//!        │                    │      ↓                       │
//!        │              ┌─────────────────┐                  │
//!        └──────────────│ Reconnecting(n) │<─────────────────┘
//!                       └─────────────────┘
//!                                │ n > max_attempts, or auth rejected
//!                                ↓
//!                          ┌──────────┐
//!                          │  Failed  │── reconnect ──> Connecting
//!                          └──────────┘
//! ```
//!
//! Auth rejection skips `Reconnecting` and goes straight to
//! `Failed(AuthRejected)`.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{backoff::Backoff, error::TransportError};

/// Interval between heartbeat pings while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Time allowed for a pong to answer a ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to open the channel and complete the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Actions returned by the connection state machine.
///
/// The driver executes these actions:
/// - `Open`: open the channel through the connector
/// - `SendPing`: encode and send a ping frame
/// - `CloseSocket`: drop the open channel and any in-flight open
/// - `ScheduleRetry`: informational, the driver wakes up at `next_deadline`
/// - `StateChanged`: publish the new state to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the channel and perform the handshake
    Open,

    /// Send a heartbeat ping carrying this nonce
    SendPing {
        /// Nonce the matching pong must echo
        nonce: u64,
    },

    /// Tear down the channel
    CloseSocket {
        /// Reason for closing the channel
        reason: String,
    },

    /// A reconnect attempt is due after `delay`
    ScheduleRetry {
        /// Consecutive failure count, 1-based
        attempt: u32,
        /// Backoff delay before the attempt
        delay: Duration,
    },

    /// The connection moved to a new state
    StateChanged(ConnectionState),
}

/// Why a connection stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Server rejected the credentials
    AuthRejected,
    /// Consecutive failures exceeded the retry budget
    RetriesExhausted,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel and no attempt scheduled
    Disconnected,
    /// Channel open or handshake in progress
    Connecting,
    /// Handshake complete, frames flow
    Connected,
    /// Waiting out the backoff before attempt `attempt`
    Reconnecting {
        /// Consecutive failure count, 1-based
        attempt: u32,
    },
    /// Automatic retry stopped until an explicit reconnect
    Failed(FailureReason),
}

impl ConnectionState {
    /// Whether frames can be sent right now.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Heartbeat interval (should be > pong_timeout)
    pub heartbeat_interval: Duration,
    /// Time a ping may go unanswered before the channel counts as dead
    pub pong_timeout: Duration,
    /// Timeout for opening the channel
    pub handshake_timeout: Duration,
    /// Reconnect policy
    pub backoff: Backoff,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            backoff: Backoff::default(),
        }
    }
}

/// Transport connection state machine
///
/// Manages lifecycle, heartbeats, and reconnect scheduling for a single
/// realtime channel.
///
/// This is a pure state machine: no I/O, no Environment storage. Time and
/// entropy are passed as parameters to methods that need them.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct TransportConnection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Current state
    state: ConnectionState,
    /// Configuration
    config: ConnectionConfig,
    /// Consecutive failures since the last successful handshake
    failures: u32,
    /// When the pending retry was scheduled, and its delay
    retry: Option<(I, Duration)>,
    /// When the current open attempt started
    connecting_since: Option<I>,
    /// Last heartbeat sent (or handshake completion)
    last_heartbeat: Option<I>,
    /// Outstanding ping nonce and when it was sent
    awaiting_pong: Option<(u64, I)>,
}

impl<I> TransportConnection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new connection in [`ConnectionState::Disconnected`] state
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            failures: 0,
            retry: None,
            connecting_since: None,
            last_heartbeat: None,
            awaiting_pong: None,
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful handshake.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Connection configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start connecting.
    ///
    /// Only acts from `Disconnected` or `Failed`; a connection that is already
    /// connecting, connected, or waiting to reconnect is left alone.
    pub fn connect(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                self.failures = 0;
                self.begin_attempt(now)
            },
            _ => Vec::new(),
        }
    }

    /// Explicit reconnect.
    ///
    /// From `Failed`, `Reconnecting`, or `Disconnected`, resets the failure
    /// counter and connects immediately. No-op while connecting or connected.
    pub fn reconnect(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Failed(_)
            | ConnectionState::Reconnecting { .. }
            | ConnectionState::Disconnected => {
                self.failures = 0;
                self.begin_attempt(now)
            },
            ConnectionState::Connecting | ConnectionState::Connected => Vec::new(),
        }
    }

    /// The channel opened and the handshake completed.
    ///
    /// Resets the failure counter. If the connection already left
    /// `Connecting` (closed or timed out meanwhile), the late channel is
    /// closed instead.
    pub fn handshake_succeeded(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return vec![ConnectionAction::CloseSocket {
                reason: "handshake completed after the attempt was abandoned".to_string(),
            }];
        }

        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.connecting_since = None;
        self.last_heartbeat = Some(now);
        self.awaiting_pong = None;

        vec![ConnectionAction::StateChanged(self.state)]
    }

    /// Opening the channel failed. Ignored unless connecting.
    pub fn handshake_failed(
        &mut self,
        err: &TransportError,
        now: I,
        entropy: u64,
    ) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.fail(err, now, entropy)
    }

    /// The open channel errored or closed. Ignored unless connected.
    pub fn socket_failed(
        &mut self,
        err: &TransportError,
        now: I,
        entropy: u64,
    ) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }
        self.fail(err, now, entropy)
    }

    /// Record a pong. Returns true if it answered the outstanding ping.
    pub fn handle_pong(&mut self, nonce: u64) -> bool {
        match self.awaiting_pong {
            Some((expected, _)) if expected == nonce => {
                self.awaiting_pong = None;
                true
            },
            _ => false,
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return Vec::new();
        }

        self.clear_attempt();
        self.failures = 0;
        self.state = ConnectionState::Disconnected;

        vec![
            ConnectionAction::CloseSocket { reason: "closed by client".to_string() },
            ConnectionAction::StateChanged(self.state),
        ]
    }

    /// Process periodic maintenance (retries, timeouts, heartbeats).
    ///
    /// `entropy` is used for backoff jitter or as the ping nonce, whichever
    /// this tick needs.
    pub fn tick(&mut self, now: I, entropy: u64) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Reconnecting { .. } => match self.retry {
                Some((since, delay)) if now - since >= delay => self.begin_attempt(now),
                _ => Vec::new(),
            },
            ConnectionState::Connecting => match self.connecting_since {
                Some(since) if now - since >= self.config.handshake_timeout => {
                    self.fail(&TransportError::Timeout { elapsed: now - since }, now, entropy)
                },
                _ => Vec::new(),
            },
            ConnectionState::Connected => {
                if let Some((_, sent)) = self.awaiting_pong {
                    let elapsed = now - sent;
                    if elapsed >= self.config.pong_timeout {
                        return self.fail(&TransportError::Timeout { elapsed }, now, entropy);
                    }
                    return Vec::new();
                }

                let due = match self.last_heartbeat {
                    None => true,
                    Some(last) => now - last >= self.config.heartbeat_interval,
                };
                if !due {
                    return Vec::new();
                }

                self.last_heartbeat = Some(now);
                self.awaiting_pong = Some((entropy, now));
                vec![ConnectionAction::SendPing { nonce: entropy }]
            },
            ConnectionState::Disconnected | ConnectionState::Failed(_) => Vec::new(),
        }
    }

    /// Time until the next `tick` has work to do. `None` if nothing is
    /// scheduled.
    #[must_use]
    pub fn next_deadline(&self, now: I) -> Option<Duration> {
        match self.state {
            ConnectionState::Reconnecting { .. } => {
                self.retry.map(|(since, delay)| delay.saturating_sub(now - since))
            },
            ConnectionState::Connecting => self
                .connecting_since
                .map(|since| self.config.handshake_timeout.saturating_sub(now - since)),
            ConnectionState::Connected => match (self.awaiting_pong, self.last_heartbeat) {
                (Some((_, sent)), _) => Some(self.config.pong_timeout.saturating_sub(now - sent)),
                (None, Some(last)) => {
                    Some(self.config.heartbeat_interval.saturating_sub(now - last))
                },
                (None, None) => Some(Duration::ZERO),
            },
            ConnectionState::Disconnected | ConnectionState::Failed(_) => None,
        }
    }

    fn begin_attempt(&mut self, now: I) -> Vec<ConnectionAction> {
        self.clear_attempt();
        self.state = ConnectionState::Connecting;
        self.connecting_since = Some(now);

        vec![ConnectionAction::StateChanged(self.state), ConnectionAction::Open]
    }

    fn fail(&mut self, err: &TransportError, now: I, entropy: u64) -> Vec<ConnectionAction> {
        self.clear_attempt();
        let mut actions = vec![ConnectionAction::CloseSocket { reason: err.to_string() }];

        if err.is_terminal() {
            self.state = ConnectionState::Failed(FailureReason::AuthRejected);
            actions.push(ConnectionAction::StateChanged(self.state));
            return actions;
        }

        self.failures = self.failures.saturating_add(1);
        if self.config.backoff.exhausted(self.failures) {
            self.state = ConnectionState::Failed(FailureReason::RetriesExhausted);
            actions.push(ConnectionAction::StateChanged(self.state));
            return actions;
        }

        let attempt = self.failures;
        let delay = self.config.backoff.delay(attempt, entropy);
        debug!(attempt, ?delay, error = %err, "scheduling reconnect");
        self.retry = Some((now, delay));
        self.state = ConnectionState::Reconnecting { attempt };

        actions.push(ConnectionAction::StateChanged(self.state));
        actions.push(ConnectionAction::ScheduleRetry { attempt, delay });
        actions
    }

    fn clear_attempt(&mut self) {
        self.retry = None;
        self.connecting_since = None;
        self.last_heartbeat = None;
        self.awaiting_pong = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_error() -> TransportError {
        TransportError::NetworkUnavailable("connection reset".to_string())
    }

    fn connected(t0: Instant) -> TransportConnection {
        let mut conn = TransportConnection::new(ConnectionConfig::default());
        conn.connect(t0);
        conn.handshake_succeeded(t0);
        conn
    }

    #[test]
    fn connection_lifecycle() {
        let t0 = Instant::now();
        let mut conn = TransportConnection::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.connect(t0);
        assert_eq!(actions, vec![
            ConnectionAction::StateChanged(ConnectionState::Connecting),
            ConnectionAction::Open,
        ]);

        let actions = conn.handshake_succeeded(t0);
        assert_eq!(actions, vec![ConnectionAction::StateChanged(ConnectionState::Connected)]);
        assert!(conn.state().is_connected());

        let actions = conn.close();
        assert_eq!(actions.len(), 2);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Idempotent
        assert!(conn.close().is_empty());
    }

    #[test]
    fn connect_while_connected_is_noop() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        assert!(conn.connect(t0).is_empty());
        assert!(conn.reconnect(t0).is_empty());
    }

    #[test]
    fn socket_error_schedules_retry() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.socket_failed(&network_error(), t0, 0);
        assert!(matches!(actions[0], ConnectionAction::CloseSocket { .. }));
        assert_eq!(actions[1], ConnectionAction::StateChanged(ConnectionState::Reconnecting {
            attempt: 1
        }));
        assert_eq!(actions[2], ConnectionAction::ScheduleRetry {
            attempt: 1,
            delay: Duration::from_secs(2)
        });

        // Not yet due
        assert!(conn.tick(t0 + Duration::from_secs(1), 0).is_empty());
        assert_eq!(conn.next_deadline(t0 + Duration::from_secs(1)), Some(Duration::from_secs(1)));

        let actions = conn.tick(t0 + Duration::from_secs(2), 0);
        assert_eq!(actions, vec![
            ConnectionAction::StateChanged(ConnectionState::Connecting),
            ConnectionAction::Open,
        ]);
        assert_eq!(conn.failures(), 1);

        conn.handshake_succeeded(t0 + Duration::from_secs(3));
        assert_eq!(conn.failures(), 0);
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let t0 = Instant::now();
        let mut conn = TransportConnection::new(ConnectionConfig::default());
        conn.connect(t0);

        let actions =
            conn.handshake_failed(&TransportError::AuthRejected("401".to_string()), t0, 0);
        assert_eq!(conn.state(), ConnectionState::Failed(FailureReason::AuthRejected));
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::ScheduleRetry { .. })));

        // Nothing happens on its own
        assert!(conn.tick(t0 + Duration::from_secs(3600), 0).is_empty());
        assert_eq!(conn.next_deadline(t0), None);

        // Explicit reconnect starts over
        let actions = conn.reconnect(t0);
        assert!(actions.contains(&ConnectionAction::Open));
    }

    #[test]
    fn retries_exhaust_after_max_attempts() {
        let config = ConnectionConfig {
            backoff: Backoff { max_attempts: 2, ..Backoff::default() },
            ..ConnectionConfig::default()
        };
        let mut now = Instant::now();
        let mut conn = TransportConnection::new(config);
        conn.connect(now);

        for attempt in 1..=2 {
            conn.handshake_failed(&network_error(), now, 0);
            assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt });
            now += Duration::from_secs(60);
            conn.tick(now, 0);
            assert_eq!(conn.state(), ConnectionState::Connecting);
        }

        conn.handshake_failed(&network_error(), now, 0);
        assert_eq!(conn.state(), ConnectionState::Failed(FailureReason::RetriesExhausted));
        assert!(conn.tick(now + Duration::from_secs(3600), 0).is_empty());
    }

    #[test]
    fn handshake_timeout_counts_as_failure() {
        let t0 = Instant::now();
        let mut conn = TransportConnection::new(ConnectionConfig::default());
        conn.connect(t0);

        assert!(conn.tick(t0 + Duration::from_secs(14), 0).is_empty());
        conn.tick(t0 + DEFAULT_HANDSHAKE_TIMEOUT, 0);
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn heartbeat_sends_ping_with_nonce() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        assert!(conn.tick(t0 + Duration::from_secs(10), 7).is_empty());

        let t1 = t0 + DEFAULT_HEARTBEAT_INTERVAL;
        assert_eq!(conn.tick(t1, 7), vec![ConnectionAction::SendPing { nonce: 7 }]);

        // Wrong nonce does not count
        assert!(!conn.handle_pong(8));
        assert!(conn.handle_pong(7));

        let t2 = t1 + DEFAULT_HEARTBEAT_INTERVAL;
        assert_eq!(conn.tick(t2, 9), vec![ConnectionAction::SendPing { nonce: 9 }]);
        assert!(conn.state().is_connected());
    }

    #[test]
    fn missing_pong_triggers_reconnect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let t1 = t0 + DEFAULT_HEARTBEAT_INTERVAL;
        conn.tick(t1, 7);
        assert!(conn.tick(t1 + Duration::from_secs(9), 0).is_empty());

        let actions = conn.tick(t1 + DEFAULT_PONG_TIMEOUT, 0);
        assert!(matches!(actions[0], ConnectionAction::CloseSocket { .. }));
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn late_handshake_is_closed() {
        let t0 = Instant::now();
        let mut conn = TransportConnection::new(ConnectionConfig::default());
        conn.connect(t0);
        conn.close();

        let actions = conn.handshake_succeeded(t0);
        assert!(matches!(actions[0], ConnectionAction::CloseSocket { .. }));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stale_failures_are_ignored() {
        let t0 = Instant::now();
        let mut conn = TransportConnection::new(ConnectionConfig::default());

        assert!(conn.socket_failed(&network_error(), t0, 0).is_empty());
        assert!(conn.handshake_failed(&network_error(), t0, 0).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
