//! In-Process Transport
//!
//! Channel-backed realtime transport with no serialization. Tests play the
//! server by holding the other ends of the channels.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, client_events, server_tx) = InProcessTransport::new_pair();
//!
//! // Read what the client emitted from `client_events`,
//! // push server events through `server_tx`
//! ```
//!
//! For code that creates transports itself (the connection manager), an
//! [`InProcessFactory`] hands each new connection's server side to the test
//! as an [`InProcessPeer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{ClientEvent, ServerEvent};
use crate::messages::UserId;
use crate::session::Identity;

use super::traits::{RealtimeTransport, TransportError, TransportFactory};

/// Default channel capacity
const CHANNEL_CAPACITY: usize = 100;

/// In-process transport using tokio channels
pub struct InProcessTransport {
    /// Channel to send events to the server side
    event_tx: mpsc::Sender<ClientEvent>,
    /// Channel to receive events from the server side
    server_rx: mpsc::Receiver<ServerEvent>,
    /// Connection state
    connected: Arc<AtomicBool>,
}

impl InProcessTransport {
    /// Create a new in-process transport pair
    ///
    /// Returns:
    /// - `InProcessTransport`: give this to the client
    /// - `mpsc::Receiver<ClientEvent>`: the server side reads client events here
    /// - `mpsc::Sender<ServerEvent>`: the server side pushes events here
    ///
    /// The transport starts connected.
    #[must_use]
    pub fn new_pair() -> (
        Self,
        mpsc::Receiver<ClientEvent>,
        mpsc::Sender<ServerEvent>,
    ) {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let transport = Self {
            event_tx,
            server_rx,
            connected: Arc::new(AtomicBool::new(true)),
        };

        (transport, event_rx, server_tx)
    }
}

#[async_trait]
impl RealtimeTransport for InProcessTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState(
                "Transport not connected".to_string(),
            ));
        }

        self.event_tx
            .send(event)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
        self.server_rx
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        self.server_rx.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Server side of one in-process connection
#[derive(Debug)]
pub struct InProcessPeer {
    /// Identity the connection was created for
    pub user_id: UserId,
    /// Events the client emitted
    pub events: mpsc::Receiver<ClientEvent>,
    /// Push server events to the client; drop to close the connection
    pub server: mpsc::Sender<ServerEvent>,
}

/// Factory producing in-process transports
///
/// Each created transport's server side is delivered on the receiver
/// returned by [`InProcessFactory::new`].
#[derive(Clone)]
pub struct InProcessFactory {
    peers: mpsc::UnboundedSender<InProcessPeer>,
    refuse: Arc<AtomicBool>,
}

impl InProcessFactory {
    /// Create a factory and the receiver its peers arrive on
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InProcessPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let factory = Self {
            peers,
            refuse: Arc::new(AtomicBool::new(false)),
        };
        (factory, peer_rx)
    }

    /// Make subsequent connection attempts fail (simulates a network error)
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl TransportFactory for InProcessFactory {
    fn create(&self, identity: &Identity) -> Result<Box<dyn RealtimeTransport>, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }

        let (transport, events, server) = InProcessTransport::new_pair();
        self.peers
            .send(InProcessPeer {
                user_id: identity.user_id.clone(),
                events,
                server,
            })
            .map_err(|_| TransportError::ConnectionFailed("no server side".to_string()))?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ConversationId;

    #[tokio::test]
    async fn test_in_process_roundtrip() {
        let (mut transport, mut event_rx, server_tx) = InProcessTransport::new_pair();

        transport
            .send(ClientEvent::JoinRoom(ConversationId::new("c1")))
            .await
            .unwrap();
        let received = event_rx.recv().await.unwrap();
        assert_eq!(received, ClientEvent::JoinRoom(ConversationId::new("c1")));

        server_tx
            .send(ServerEvent::Typing(ConversationId::new("c1")))
            .await
            .unwrap();
        let received = transport.recv().await.unwrap();
        assert_eq!(received, ServerEvent::Typing(ConversationId::new("c1")));
    }

    #[tokio::test]
    async fn test_in_process_try_recv() {
        let (mut transport, _event_rx, server_tx) = InProcessTransport::new_pair();
        assert!(transport.try_recv().is_none());

        server_tx.send(ServerEvent::SetupAcknowledged).await.unwrap();
        assert_eq!(transport.try_recv(), Some(ServerEvent::SetupAcknowledged));
    }

    #[tokio::test]
    async fn test_in_process_disconnect() {
        let (mut transport, _event_rx, _server_tx) = InProcessTransport::new_pair();
        assert!(transport.is_connected());

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());

        let result = transport
            .send(ClientEvent::Typing(ConversationId::new("c1")))
            .await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_in_process_server_gone() {
        let (mut transport, _event_rx, server_tx) = InProcessTransport::new_pair();
        drop(server_tx);
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_factory_refuses_on_demand() {
        let (factory, mut peers) = InProcessFactory::new();
        let identity = Identity {
            user_id: UserId::new("u1"),
            display_name: "Ana".into(),
            email: None,
            avatar: None,
            profile_complete: true,
            token: crate::session::Credential::new("t"),
        };

        assert!(factory.create(&identity).is_ok());
        assert_eq!(peers.recv().await.unwrap().user_id, UserId::new("u1"));

        factory.set_refuse(true);
        assert!(matches!(
            factory.create(&identity),
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
