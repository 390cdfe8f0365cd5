//! Transport error taxonomy.
//!
//! Each variant carries its own recovery policy: the connection state machine
//! retries transient failures with backoff, stops on auth rejection, and
//! ignores protocol violations (the offending frame is dropped).

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the realtime transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Network is unreachable or the socket dropped. Retried with backoff.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Server rejected the credentials. Terminal until re-authentication.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Peer sent something that does not match the protocol. The frame is
    /// dropped, the connection is unaffected.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Handshake or heartbeat did not complete in time. Triggers reconnect.
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },
}

impl TransportError {
    /// Returns true if the connection should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::Timeout { .. })
    }

    /// Returns true if no automatic retry may follow this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }
}

impl From<parley_proto::ProtocolError> for TransportError {
    fn from(err: parley_proto::ProtocolError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_transient() {
        assert!(TransportError::NetworkUnavailable("reset".to_string()).is_transient());
        assert!(TransportError::Timeout { elapsed: Duration::from_secs(10) }.is_transient());
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let err = TransportError::AuthRejected("401".to_string());
        assert!(err.is_terminal());
        assert!(!err.is_transient());
    }

    #[test]
    fn protocol_violations_are_neither() {
        let err: TransportError =
            parley_proto::ProtocolError::Malformed("expected value".to_string()).into();
        assert!(!err.is_transient());
        assert!(!err.is_terminal());
    }
}
