//! Channel addressing and handshake headers.

use std::fmt;

/// Header carrying the service API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the product identifier.
pub const PRODUCT_ID_HEADER: &str = "x-product-id";

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Path of the realtime channel for a room: `/{namespace}-{room_id}`.
#[must_use]
pub fn channel_path(namespace: &str, room_id: &str) -> String {
    format!("/{namespace}-{room_id}")
}

/// Credentials presented when opening a channel.
///
/// `Debug` redacts the secrets so the struct can appear in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeHeaders {
    /// Service API key
    pub api_key: String,
    /// Product identifier
    pub product_id: String,
    /// Bearer token of the signed-in user
    pub bearer_token: String,
}

impl HandshakeHeaders {
    /// Header name/value pairs in the order they are sent.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (API_KEY_HEADER, self.api_key.clone()),
            (PRODUCT_ID_HEADER, self.product_id.clone()),
            (AUTHORIZATION_HEADER, format!("Bearer {}", self.bearer_token)),
        ]
    }
}

impl fmt::Debug for HandshakeHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeHeaders")
            .field("api_key", &"<redacted>")
            .field("product_id", &self.product_id)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_namespace_scoped() {
        assert_eq!(channel_path("chat", "65f1c0"), "/chat-65f1c0");
    }

    #[test]
    fn bearer_prefix_and_redaction() {
        let headers = HandshakeHeaders {
            api_key: "key".to_string(),
            product_id: "prod".to_string(),
            bearer_token: "secret".to_string(),
        };

        let pairs = headers.to_pairs();
        assert_eq!(pairs[2], (AUTHORIZATION_HEADER, "Bearer secret".to_string()));

        let debug = format!("{headers:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("\"key\""));
        assert!(debug.contains("prod"));
    }
}
