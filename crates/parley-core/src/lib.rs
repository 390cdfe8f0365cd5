//! Parley core
//!
//! Pure logic shared by every Parley runtime: the chat domain model and the
//! realtime connection lifecycle.
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O. [`TransportConnection`] follows the
//! action pattern: callers feed it the current time and connection outcomes,
//! and it returns [`ConnectionAction`]s for a driver to execute. Time and
//! randomness come from an [`Environment`], so the same logic runs against the
//! system clock in production and virtual time in simulation.
//!
//! # Components
//!
//! - [`model`]: rooms, messages, pending sends and their identifiers
//! - [`TransportConnection`]: connect/heartbeat/reconnect state machine
//! - [`Backoff`]: capped exponential reconnect delays with jitter
//! - [`TransportError`]: transport failure taxonomy

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;
pub mod model;

pub use backoff::Backoff;
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionState, FailureReason, TransportConnection,
};
pub use env::Environment;
pub use error::TransportError;
