//! WebSocket Client Transport
//!
//! Production realtime transport. Connects to the realtime endpoint with the
//! identity's bearer credential in the `Authorization` header and exchanges
//! one JSON text frame per event (see [`super::frame`]).
//!
//! Reading and writing run on their own tasks, bridged to the trait methods
//! through channels, so a slow socket write never stalls event delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use crate::events::{ClientEvent, ServerEvent};
use crate::session::{Credential, Identity};

use super::frame::{decode, encode};
use super::traits::{RealtimeTransport, TransportError, TransportFactory};

/// Channel capacity between the socket tasks and the transport
const CHANNEL_CAPACITY: usize = 100;

/// Client-side WebSocket transport
pub struct WebSocketClient {
    /// Realtime endpoint
    url: String,
    /// Credential presented on connect
    token: Credential,
    /// Channel to receive events from the server
    server_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Channel to send events to the server
    event_tx: Option<mpsc::Sender<ClientEvent>>,
    /// Whether we're connected
    connected: Arc<AtomicBool>,
}

impl WebSocketClient {
    /// Create an unconnected client
    pub fn new(url: impl Into<String>, token: Credential) -> Self {
        Self {
            url: url.into(),
            token,
            server_rx: None,
            event_tx: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Realtime endpoint
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState(
                "Already connected".to_string(),
            ));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL {}: {e}", self.url)))?;
        let auth = HeaderValue::from_str(&self.token.bearer())
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid credential: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to connect to {}: {e}", self.url))
            })?;

        let (mut write_half, mut read_half) = stream.split();

        let (server_tx, server_rx) = mpsc::channel::<ServerEvent>(CHANNEL_CAPACITY);
        let (event_tx, mut event_rx) = mpsc::channel::<ClientEvent>(CHANNEL_CAPACITY);

        let connected = Arc::clone(&self.connected);
        connected.store(true, Ordering::SeqCst);

        // Read task: socket -> server_tx
        let connected_read = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(frame) = read_half.next().await {
                match frame {
                    Ok(Message::Text(text)) => match decode::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            if server_tx.send(event).await.is_err() {
                                tracing::debug!("Event receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping undecodable frame");
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Connection closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            connected_read.store(false, Ordering::SeqCst);
            tracing::info!("Realtime connection closed");
        });

        // Write task: event_rx -> socket
        let connected_write = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match encode(&event) {
                    Ok(text) => {
                        if let Err(e) = write_half.send(Message::Text(text.into())).await {
                            tracing::warn!(error = %e, "Write error");
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(event = event.name(), error = %e, "Encode error");
                    }
                }
            }

            let _ = write_half.close().await;
            connected_write.store(false, Ordering::SeqCst);
        });

        self.server_rx = Some(server_rx);
        self.event_tx = Some(event_tx);

        tracing::info!(url = %self.url, "Connected to realtime server");

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender ends the write task, which closes the socket
        self.server_rx = None;
        self.event_tx = None;
        Ok(())
    }

    async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState("Not connected".to_string()));
        }

        match self.event_tx {
            Some(ref tx) => tx
                .send(event)
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string())),
            None => Err(TransportError::InvalidState("Not connected".to_string())),
        }
    }

    async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
        match self.server_rx {
            Some(ref mut rx) => rx.recv().await.ok_or(TransportError::ConnectionClosed),
            None => Err(TransportError::InvalidState("Not connected".to_string())),
        }
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        self.server_rx.as_mut()?.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Creates [`WebSocketClient`]s for a realtime endpoint
#[derive(Clone, Debug)]
pub struct WebSocketFactory {
    url: String,
}

impl WebSocketFactory {
    /// Factory for `url` (e.g. `ws://localhost:5000/ws`)
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TransportFactory for WebSocketFactory {
    fn create(&self, identity: &Identity) -> Result<Box<dyn RealtimeTransport>, TransportError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(TransportError::InvalidState(format!(
                "Not a WebSocket URL: {}",
                self.url
            )));
        }
        Ok(Box::new(WebSocketClient::new(
            self.url.clone(),
            identity.token.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ConversationId, UserId};
    use tokio::net::TcpListener;

    fn identity() -> Identity {
        Identity {
            user_id: UserId::new("u1"),
            display_name: "Ana".into(),
            email: None,
            avatar: None,
            profile_complete: true,
            token: Credential::new("t1"),
        }
    }

    #[test]
    fn test_factory_rejects_http_url() {
        let factory = WebSocketFactory::new("http://localhost:5000");
        assert!(matches!(
            factory.create(&identity()),
            Err(TransportError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_created_client_starts_disconnected() {
        let factory = WebSocketFactory::new("ws://127.0.0.1:1/ws");
        let mut transport = factory.create(&identity()).unwrap();
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_roundtrip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            let event: ClientEvent = decode(first.to_text().unwrap()).unwrap();
            assert_eq!(event, ClientEvent::JoinRoom(ConversationId::new("c1")));

            ws.send(Message::Text("garbage".to_string().into()))
                .await
                .unwrap();
            let reply = encode(&ServerEvent::Typing(ConversationId::new("c1"))).unwrap();
            ws.send(Message::Text(reply.into())).await.unwrap();
        });

        let mut client = WebSocketClient::new(format!("ws://{addr}"), Credential::new("t1"));
        client.connect().await.unwrap();
        assert!(client.is_connected());

        client
            .send(ClientEvent::JoinRoom(ConversationId::new("c1")))
            .await
            .unwrap();

        // The garbage frame is skipped
        let event = client.recv().await.unwrap();
        assert_eq!(event, ServerEvent::Typing(ConversationId::new("c1")));

        server.await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
    }
}
