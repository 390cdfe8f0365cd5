//! WebSocket connector.
//!
//! Opens realtime channels over tokio-tungstenite. Each channel gets one I/O
//! task that pumps frames between the socket and the driver's mpsc pair.
//! Dropping the outbound sender closes the socket with a close frame.

use futures::{SinkExt, StreamExt};
use parley_core::TransportError;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message as WsMessage, client::IntoClientRequest, http::HeaderValue},
};
use tracing::{debug, info};

use crate::{
    config::DEFAULT_FRAME_BUFFER,
    transport::{ChannelRequest, Connector, SocketChannels},
};

/// [`Connector`] over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
    buffer: usize,
}

impl WebSocketConnector {
    /// Connector for channels under `base_url`, e.g. `wss://rt.example.com`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), buffer: DEFAULT_FRAME_BUFFER }
    }

    /// Capacity of the per-channel frame buffers.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    fn url(&self, request: &ChannelRequest) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), request.path)
    }
}

impl Connector for WebSocketConnector {
    async fn open(&self, request: ChannelRequest) -> Result<SocketChannels, TransportError> {
        let url = self.url(&request);
        let mut ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::NetworkUnavailable(format!("invalid url {url}: {e}")))?;

        for (name, value) in request.headers.to_pairs() {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| TransportError::AuthRejected(format!("invalid {name} header: {e}")))?;
            ws_request.headers_mut().insert(name, value);
        }

        let (socket, _) = connect_async(ws_request).await.map_err(classify)?;
        info!(room_id = %request.room_id, %url, "websocket connected");

        let (mut sink, mut stream) = socket.split();
        let (to_server, mut outbound) = mpsc::channel::<Vec<u8>>(self.buffer);
        let (inbound, from_server) = mpsc::channel(self.buffer);
        let room_id = request.room_id;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        let Some(bytes) = frame else {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let message = match String::from_utf8(bytes) {
                            Ok(text) => WsMessage::Text(text),
                            Err(err) => WsMessage::Binary(err.into_bytes()),
                        };
                        if let Err(err) = sink.send(message).await {
                            let _ = inbound.send(Err(classify(err))).await;
                            break;
                        }
                    },
                    message = stream.next() => {
                        let forwarded = match message {
                            Some(Ok(WsMessage::Text(text))) => Ok(text.into_bytes()),
                            Some(Ok(WsMessage::Binary(bytes))) => Ok(bytes),
                            Some(Ok(WsMessage::Close(frame))) => {
                                let _ = inbound
                                    .send(Err(TransportError::NetworkUnavailable(format!(
                                        "closed by server: {frame:?}"
                                    ))))
                                    .await;
                                break;
                            },
                            // Control frames are answered by tungstenite
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => Err(classify(err)),
                            None => break,
                        };
                        let failed = forwarded.is_err();
                        if inbound.send(forwarded).await.is_err() || failed {
                            break;
                        }
                    },
                }
            }
            debug!(%room_id, "websocket task stopped");
        });

        Ok(SocketChannels { to_server, from_server, abort: None })
    }
}

/// Map a tungstenite failure onto the transport taxonomy.
fn classify(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            TransportError::AuthRejected(format!("handshake rejected: {}", response.status()))
        },
        tungstenite::Error::Protocol(err) => TransportError::ProtocolViolation(err.to_string()),
        other => TransportError::NetworkUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use parley_core::model::RoomId;
    use parley_proto::HandshakeHeaders;

    use super::*;

    #[test]
    fn url_joins_base_and_channel_path() {
        let connector = WebSocketConnector::new("wss://rt.example.com/");
        let request = ChannelRequest {
            room_id: RoomId::new("r1"),
            path: "/chat-r1".to_string(),
            headers: HandshakeHeaders {
                api_key: "k".to_string(),
                product_id: "p".to_string(),
                bearer_token: "t".to_string(),
            },
        };

        assert_eq!(connector.url(&request), "wss://rt.example.com/chat-r1");
    }

    #[test]
    fn rejected_handshakes_are_terminal() {
        let response = tungstenite::http::Response::builder().status(401).body(None).unwrap();
        assert!(classify(tungstenite::Error::Http(response)).is_terminal());

        let response = tungstenite::http::Response::builder().status(502).body(None).unwrap();
        assert!(classify(tungstenite::Error::Http(response)).is_transient());
    }
}
