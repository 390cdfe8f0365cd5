//! Realtime transport driver.
//!
//! Executes the actions of the Sans-IO [`TransportConnection`] against a real
//! channel. One driver task per room owns the connection state machine, the
//! open channel, and the heartbeat timer. The rest of the client talks to it
//! through a [`TransportHandle`] and reads decoded frames from an mpsc
//! receiver.
//!
//! The channel itself comes from a [`Connector`]: the `websocket` feature
//! provides one over tokio-tungstenite, and tests plug in an in-process
//! connector.

use std::{future::Future, time::Duration};

use futures::future::BoxFuture;
use parley_core::{
    ConnectionAction, ConnectionConfig, ConnectionState, Environment, TransportConnection,
    TransportError, model::RoomId,
};
use parley_proto::{HandshakeHeaders, InboundFrame, OutboundFrame};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

/// What a connector needs to open a room's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Room the channel serves
    pub room_id: RoomId,
    /// Namespace-scoped channel path, `/{namespace}-{room_id}`
    pub path: String,
    /// Credentials presented in the handshake
    pub headers: HandshakeHeaders,
}

/// An open duplex channel.
///
/// Dropping `to_server` asks the connector to close the channel. The channel
/// is dead once `from_server` yields an error or ends.
#[derive(Debug)]
pub struct SocketChannels {
    /// Encoded frames to the server
    pub to_server: mpsc::Sender<Vec<u8>>,
    /// Raw frames from the server, or the error that ended the channel
    pub from_server: mpsc::Receiver<Result<Vec<u8>, TransportError>>,
    /// Stops the connector's I/O task, if it runs one
    pub abort: Option<AbortHandle>,
}

impl SocketChannels {
    /// Tear the channel down.
    pub fn close(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

/// Opens realtime channels.
///
/// Must map credential rejection to [`TransportError::AuthRejected`] and
/// anything retryable to [`TransportError::NetworkUnavailable`].
pub trait Connector: Clone + Send + Sync + 'static {
    /// Open the channel and complete the handshake.
    fn open(
        &self,
        request: ChannelRequest,
    ) -> impl Future<Output = Result<SocketChannels, TransportError>> + Send;
}

enum Command {
    Send { frame: OutboundFrame, reply: oneshot::Sender<Result<(), TransportError>> },
    Reconnect,
    Close,
}

/// Handle to a running transport driver.
///
/// Dropping the handle aborts the driver. Use [`TransportHandle::shutdown`]
/// for a clean close.
pub struct TransportHandle {
    room_id: RoomId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Spawn a driver that connects immediately.
    ///
    /// Returns the handle and the receiver of decoded inbound frames. Pongs and
    /// unknown frame types are consumed by the driver and never delivered.
    pub fn spawn<E, C>(
        env: E,
        connector: C,
        request: ChannelRequest,
        config: ConnectionConfig,
        frame_buffer: usize,
    ) -> (Self, mpsc::Receiver<InboundFrame>)
    where
        E: Environment,
        C: Connector,
    {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (frames_tx, frames_rx) = mpsc::channel(frame_buffer.max(1));

        let room_id = request.room_id.clone();
        let driver = Driver {
            conn: TransportConnection::new(config),
            env,
            connector,
            request,
            socket: None,
            opening: None,
            state_tx,
            frames_tx,
        };
        let task = tokio::spawn(driver.run(commands_rx));

        let handle = Self { room_id, commands: commands_tx, state: state_rx, task: Some(task) };
        (handle, frames_rx)
    }

    /// Room this transport serves.
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver of connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Best-effort outbound push.
    ///
    /// Fails fast with `NetworkUnavailable` when not connected and never waits
    /// for channel capacity.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        if !self.state().is_connected() {
            return Err(TransportError::NetworkUnavailable(format!(
                "not connected ({:?})",
                self.state()
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .try_send(Command::Send { frame, reply: reply_tx })
            .map_err(|e| TransportError::NetworkUnavailable(format!("driver busy: {e}")))?;

        reply_rx.await.map_err(|_| TransportError::NetworkUnavailable("driver stopped".to_string()))?
    }

    /// Explicit reconnect. See [`TransportConnection::reconnect`].
    pub async fn reconnect(&self) {
        if self.commands.send(Command::Reconnect).await.is_err() {
            debug!(room_id = %self.room_id, "reconnect requested after driver stopped");
        }
    }

    /// Close the connection and wait for the driver to exit.
    ///
    /// Aborts the driver if it does not exit within `timeout`.
    pub async fn shutdown(mut self, timeout: Duration) {
        let _ = self.commands.send(Command::Close).await;

        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!(room_id = %self.room_id, "transport driver did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver<E: Environment, C> {
    conn: TransportConnection<E::Instant>,
    env: E,
    connector: C,
    request: ChannelRequest,
    socket: Option<SocketChannels>,
    opening: Option<BoxFuture<'static, Result<SocketChannels, TransportError>>>,
    state_tx: watch::Sender<ConnectionState>,
    frames_tx: mpsc::Sender<InboundFrame>,
}

impl<E: Environment, C: Connector> Driver<E, C> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let actions = self.conn.connect(self.env.now());
        self.execute(actions);

        loop {
            let deadline = self.conn.next_deadline(self.env.now());

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send { frame, reply }) => {
                        let _ = reply.send(self.push(&frame));
                    },
                    Some(Command::Reconnect) => {
                        let actions = self.conn.reconnect(self.env.now());
                        self.execute(actions);
                    },
                    Some(Command::Close) | None => {
                        let actions = self.conn.close();
                        self.execute(actions);
                        break;
                    },
                },

                opened = poll_opening(&mut self.opening) => {
                    self.opening = None;
                    let now = self.env.now();
                    let actions = match opened {
                        Ok(channels) => {
                            self.socket = Some(channels);
                            self.conn.handshake_succeeded(now)
                        },
                        Err(err) => {
                            warn!(room_id = %self.request.room_id, error = %err, "channel open failed");
                            self.conn.handshake_failed(&err, now, self.env.random_u64())
                        },
                    };
                    self.execute(actions);
                },

                inbound = recv_socket(&mut self.socket) => match inbound {
                    Some(Ok(bytes)) => self.handle_bytes(&bytes).await,
                    Some(Err(err)) => self.socket_failed(&err),
                    None => self.socket_failed(&TransportError::NetworkUnavailable(
                        "channel closed by peer".to_string(),
                    )),
                },

                () = sleep_for(&self.env, deadline) => {
                    let actions = self.conn.tick(self.env.now(), self.env.random_u64());
                    self.execute(actions);
                },
            }
        }

        debug!(room_id = %self.request.room_id, "transport driver stopped");
    }

    fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Open => {
                    let connector = self.connector.clone();
                    let request = self.request.clone();
                    self.opening = Some(Box::pin(async move { connector.open(request).await }));
                },
                ConnectionAction::SendPing { nonce } => {
                    if let Err(err) = self.push(&OutboundFrame::Ping { nonce }) {
                        debug!(room_id = %self.request.room_id, error = %err, "ping not sent");
                    }
                },
                ConnectionAction::CloseSocket { reason } => {
                    debug!(room_id = %self.request.room_id, %reason, "closing channel");
                    self.opening = None;
                    if let Some(socket) = self.socket.take() {
                        socket.close();
                    }
                },
                ConnectionAction::ScheduleRetry { attempt, delay } => {
                    info!(room_id = %self.request.room_id, attempt, ?delay, "reconnect scheduled");
                },
                ConnectionAction::StateChanged(state) => {
                    info!(room_id = %self.request.room_id, ?state, "connection state changed");
                    self.state_tx.send_replace(state);
                },
            }
        }
    }

    fn push(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let Some(socket) = &self.socket else {
            return Err(TransportError::NetworkUnavailable("no open channel".to_string()));
        };

        let bytes = frame.encode()?;
        socket.to_server.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::NetworkUnavailable("outbound buffer full".to_string())
            },
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::NetworkUnavailable("channel closed".to_string())
            },
        })
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) {
        match InboundFrame::decode(bytes) {
            Ok(InboundFrame::Pong { nonce }) => {
                if !self.conn.handle_pong(nonce) {
                    debug!(room_id = %self.request.room_id, nonce, "unsolicited pong");
                }
            },
            Ok(InboundFrame::Unknown) => {
                debug!(room_id = %self.request.room_id, "ignoring unknown frame type");
            },
            Ok(frame) => {
                if self.frames_tx.send(frame).await.is_err() {
                    debug!(room_id = %self.request.room_id, "frame receiver dropped");
                }
            },
            Err(err) => {
                warn!(room_id = %self.request.room_id, error = %err, "dropping malformed frame");
            },
        }
    }

    fn socket_failed(&mut self, err: &TransportError) {
        warn!(room_id = %self.request.room_id, error = %err, "channel failed");
        let actions = self.conn.socket_failed(err, self.env.now(), self.env.random_u64());
        self.execute(actions);
        // A failure the state machine ignored still leaves a dead channel behind
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }
}

async fn poll_opening(
    opening: &mut Option<BoxFuture<'static, Result<SocketChannels, TransportError>>>,
) -> Result<SocketChannels, TransportError> {
    match opening {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn recv_socket(
    socket: &mut Option<SocketChannels>,
) -> Option<Result<Vec<u8>, TransportError>> {
    match socket {
        Some(socket) => socket.from_server.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_for<E: Environment>(env: &E, deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => env.sleep(deadline).await,
        None => std::future::pending().await,
    }
}
