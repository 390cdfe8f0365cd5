//! Client configuration.

use std::{fmt, time::Duration};

use parley_core::{ConnectionConfig, model::Sender};
use parley_proto::HandshakeHeaders;

/// Messages requested per history page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Namespace prefix of realtime channel paths.
pub const DEFAULT_NAMESPACE: &str = "chat";

/// Capacity of the engine's event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Capacity of the per-session frame and event channels.
pub const DEFAULT_FRAME_BUFFER: usize = 64;

/// Time a closing session gets to shut its transport down before it is
/// aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Messages requested per history page
    pub page_size: usize,
    /// Realtime channel namespace, the `chat` in `/chat-{room_id}`
    pub namespace: String,
    /// Capacity of the event broadcast. Slow subscribers past this lag and
    /// skip events.
    pub event_capacity: usize,
    /// Capacity of per-session channels
    pub frame_buffer: usize,
    /// Grace period for transport shutdown
    pub shutdown_timeout: Duration,
    /// Realtime connection lifecycle settings
    pub connection: ConnectionConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            namespace: DEFAULT_NAMESPACE.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            frame_buffer: DEFAULT_FRAME_BUFFER,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Credentials and identity of the signed-in user.
///
/// `Debug` redacts the secrets.
#[derive(Clone)]
pub struct AuthContext {
    /// Service API key
    pub api_key: String,
    /// Product identifier
    pub product_id: String,
    /// Bearer token
    pub bearer_token: String,
    /// The signed-in user, author of optimistic messages
    pub user: Sender,
}

impl AuthContext {
    /// Headers presented when opening a realtime channel.
    #[must_use]
    pub fn handshake_headers(&self) -> HandshakeHeaders {
        HandshakeHeaders {
            api_key: self.api_key.clone(),
            product_id: self.product_id.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("api_key", &"<redacted>")
            .field("product_id", &self.product_id)
            .field("bearer_token", &"<redacted>")
            .field("user", &self.user.id)
            .finish()
    }
}
