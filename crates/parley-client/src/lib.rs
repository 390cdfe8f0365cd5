//! Parley client
//!
//! Chat synchronization runtime. Keeps a local cache of rooms and messages
//! consistent with a REST history API and a per-room realtime channel, with
//! optimistic sends, reconnection and pagination.
//!
//! # Architecture
//!
//! Connection logic lives in [`parley_core`] as a Sans-IO state machine. This
//! crate supplies the I/O around it: a tokio driver per realtime channel, a
//! synchronous [`MessageStore`] behind a single writer, and a [`SyncEngine`]
//! that merges every delivery path into the store by server id.
//!
//! ```text
//! ChatGateway -> SyncEngine -> MessageStore
//!                    |
//!                    +-> SessionManager -> RoomSession -> TransportHandle -> Connector
//! ```
//!
//! # Components
//!
//! - [`ChatGateway`]: façade handed to UI code
//! - [`SyncEngine`]: fetch, send and realtime reconciliation
//! - [`SessionManager`] / [`RoomSession`]: one realtime session at a time
//! - [`TransportHandle`]: driver task for one channel
//! - [`MemoryStore`] / [`RedbStore`]: cache backends
//! - [`RestClient`] / [`Connector`]: seams to the HTTP and socket stacks
//!
//! # Transport (optional)
//!
//! With the `websocket` feature enabled, [`ws::WebSocketConnector`] opens
//! channels over tokio-tungstenite.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
mod error;
mod event;
mod gateway;
pub mod rest;
mod session;
pub mod store;
mod sync;
mod system_env;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod ws;

pub use config::{AuthContext, SyncConfig};
pub use error::{StoreError, SyncError};
pub use event::ChatEvent;
pub use gateway::{ChatGateway, RoomStream};
pub use parley_core::{ConnectionState, Environment, FailureReason, TransportError, model};
pub use rest::{Endpoint, HttpError, RestClient, RestResponse};
pub use session::{InboundEvent, RoomSession, SessionManager};
pub use store::{MemoryStore, MergeReport, MessageStore, PendingOutcome, RedbStore, Resolution};
pub use sync::{Fetched, Freshness, SyncEngine};
pub use system_env::SystemEnv;
pub use transport::{ChannelRequest, Connector, SocketChannels, TransportHandle};
