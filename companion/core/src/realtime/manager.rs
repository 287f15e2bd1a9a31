//! Realtime Connection Manager
//!
//! Owns the single realtime connection of the process and turns its inbound
//! traffic into typed [`BusEvent`]s.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      └────────failure─────────┘                  │
//!      └──────────disconnect / transport closed────┘
//! ```
//!
//! Transitions are driven by identity presence and transport events only:
//! there is no retry or backoff, and room joins are not replayed after a new
//! connection. Components that need a room re-join it when they see
//! [`BusEvent::Connected`].
//!
//! # Concurrency
//!
//! A connected transport is owned by one pump task that multiplexes outbound
//! events (from [`ConnectionManager::emit`]) and inbound events (from the
//! server). Every connection gets a generation number; a pump whose
//! generation is no longer current publishes nothing, so a torn-down
//! connection can never leak events into its successor.
//!
//! The link lock is only held for bookkeeping, never across a handshake or a
//! send. A handshake that finishes after its generation was superseded
//! discards its transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::{BusEvent, ClientEvent, EventKind, ServerEvent, SetupPayload};
use crate::messages::{ConversationId, UserId};
use crate::session::{Identity, SessionState, SessionStore};
use crate::transport::{RealtimeTransport, TransportError, TransportFactory};

use super::bus::{EventBus, Subscription};

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 64;

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open and identity announced
    Connected,
}

/// Observable connection status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Lifecycle state
    pub state: ConnectionState,
    /// Identity the connection belongs to (set while connecting or connected)
    pub user_id: Option<UserId>,
    /// The server acknowledged `setup`
    pub setup_acknowledged: bool,
}

struct Link {
    user_id: UserId,
    generation: u64,
    outbound: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

struct Inner {
    factory: Arc<dyn TransportFactory>,
    bus: EventBus,
    status: watch::Sender<ConnectionStatus>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

/// Handle to the process-wide realtime connection
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that builds transports with `factory`
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::default());
        Self {
            inner: Arc::new(Inner {
                factory,
                bus: EventBus::new(),
                status,
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Open a connection authenticated as `identity`
    ///
    /// A live or in-flight connection for the same identity is kept; one for
    /// a different identity is torn down first. Never fails: on error the
    /// manager ends up `Disconnected`, which callers observe through
    /// [`Self::is_connected`] or [`Self::status`].
    ///
    /// The handshake runs without holding the link lock, so [`Self::emit`]
    /// and [`Self::disconnect`] stay responsive while it is in flight. A
    /// connect superseded by a later connect or disconnect drops its
    /// transport instead of installing it.
    pub async fn connect(&self, identity: &Identity) {
        let (generation, previous) = {
            let mut link = self.inner.link.lock();

            let status = self.inner.status.borrow().clone();
            if status.state != ConnectionState::Disconnected
                && status.user_id.as_ref() == Some(&identity.user_id)
            {
                tracing::debug!(user_id = %identity.user_id, state = ?status.state, "Already connected");
                return;
            }

            let previous = link.take();
            self.inner.supersede("identity changed");
            let generation = self.inner.generation.load(Ordering::SeqCst);
            self.inner.status.send_replace(ConnectionStatus {
                state: ConnectionState::Connecting,
                user_id: Some(identity.user_id.clone()),
                setup_acknowledged: false,
            });
            (generation, previous)
        };
        if let Some(old) = previous {
            finish_teardown(old, "identity changed").await;
        }
        tracing::info!(user_id = %identity.user_id, "Connecting to realtime server");

        let mut transport = match self.open(identity).await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "Realtime connection failed");
                self.inner.mark_disconnected(generation, &e.to_string());
                return;
            }
        };

        let installed = {
            let mut link = self.inner.link.lock();
            if self.inner.is_current(generation) {
                let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                self.inner.status.send_modify(|status| {
                    status.state = ConnectionState::Connected;
                });
                self.inner.bus.publish(&BusEvent::Connected);

                let task = tokio::spawn(pump(
                    Arc::clone(&self.inner),
                    transport,
                    outbound_rx,
                    generation,
                ));
                *link = Some(Link {
                    user_id: identity.user_id.clone(),
                    generation,
                    outbound,
                    task,
                });
                None
            } else {
                Some(transport)
            }
        };

        match installed {
            None => tracing::info!(user_id = %identity.user_id, "Realtime connection established"),
            Some(mut abandoned) => {
                tracing::debug!(user_id = %identity.user_id, "Connect superseded; dropping transport");
                let _ = abandoned.disconnect().await;
            }
        }
    }

    async fn open(&self, identity: &Identity) -> Result<Box<dyn RealtimeTransport>, TransportError> {
        let mut transport = self.inner.factory.create(identity)?;
        transport.connect().await?;

        let setup = ClientEvent::Setup(SetupPayload {
            id: identity.user_id.clone(),
            full_name: identity.display_name.clone(),
        });
        if let Err(e) = transport.send(setup).await {
            let _ = transport.disconnect().await;
            return Err(e);
        }
        Ok(transport)
    }

    /// Close the connection, or abandon one that is still being opened
    ///
    /// Idempotent; safe to call in any state.
    pub async fn disconnect(&self) {
        let previous = {
            let mut link = self.inner.link.lock();
            let previous = link.take();
            self.inner.supersede("disconnect requested");
            previous
        };
        match previous {
            Some(old) => finish_teardown(old, "disconnect requested").await,
            None => tracing::debug!("Disconnect with no established connection"),
        }
    }

    /// Join a conversation's room
    ///
    /// Best-effort: does nothing when not connected. Joins are additive.
    pub async fn join_room(&self, conversation: &ConversationId) {
        if !self.is_connected() {
            tracing::debug!(conversation_id = %conversation, "Not connected; skipping room join");
            return;
        }
        if let Err(e) = self.emit(ClientEvent::JoinRoom(conversation.clone())).await {
            tracing::warn!(conversation_id = %conversation, error = %e, "Room join failed");
        }
    }

    /// Send an event to the server
    ///
    /// Best-effort: fails with `InvalidState` right away unless connected.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::InvalidState("Not connected".to_string()));
        }
        let outbound = self
            .inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or_else(|| TransportError::InvalidState("Not connected".to_string()))?;
        tracing::trace!(event = event.name(), "Emitting realtime event");
        outbound
            .send(event)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Whether the connection is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().state == ConnectionState::Connected
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Observe status changes
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to bus events of the given kinds
    #[must_use]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.inner.bus.subscribe(kinds)
    }

    /// The event bus
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Keep the connection in step with a session: connect while
    /// authenticated, disconnect otherwise
    ///
    /// Runs until the session store is dropped.
    pub fn follow_session(&self, session: &SessionStore) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = session.watch();
        tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    SessionState::Authenticated(identity) => manager.connect(&identity).await,
                    SessionState::Anonymous | SessionState::Invalid => manager.disconnect().await,
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// End the current generation: publish `Disconnected` if anything was
    /// up or in flight, and make every older pump or handshake stale
    ///
    /// Called with the link lock held.
    fn supersede(&self, reason: &str) {
        self.mark_disconnected(self.generation.load(Ordering::SeqCst), reason);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_disconnected(&self, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        let was = self.status.send_replace(ConnectionStatus::default());
        if was.state != ConnectionState::Disconnected {
            self.bus.publish(&BusEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    fn dispatch(&self, event: ServerEvent, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        if event == ServerEvent::SetupAcknowledged {
            tracing::info!("Server acknowledged setup");
            self.status.send_modify(|status| status.setup_acknowledged = true);
            return;
        }
        match event.into_bus_event() {
            Ok(Some(bus_event)) => {
                self.bus.publish(&bus_event);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Dropping malformed realtime event"),
        }
    }
}

/// Stop a superseded connection's pump and wait for it to exit
async fn finish_teardown(link: Link, reason: &str) {
    let Link {
        user_id,
        outbound,
        task,
        ..
    } = link;
    drop(outbound);
    if let Err(e) = task.await {
        tracing::warn!(error = %e, "Realtime pump task failed");
    }
    tracing::info!(%user_id, reason, "Realtime connection closed");
}

async fn pump(
    inner: Arc<Inner>,
    mut transport: Box<dyn RealtimeTransport>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    generation: u64,
) {
    let reason = loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => {
                    let name = event.name();
                    if let Err(e) = transport.send(event).await {
                        if e.is_fatal() {
                            break e.to_string();
                        }
                        tracing::warn!(event = name, error = %e, "Failed to send realtime event");
                    }
                }
                None => break "closed by client".to_string(),
            },
            incoming = transport.recv() => match incoming {
                Ok(event) => inner.dispatch(event, generation),
                Err(e) => break e.to_string(),
            },
        }
    };

    let _ = transport.disconnect().await;
    if inner.is_current(generation) {
        tracing::info!(reason = %reason, "Realtime connection lost");
    }
    inner.mark_disconnected(generation, &reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ConversationId;
    use crate::session::Credential;
    use crate::transport::{InProcessFactory, InProcessPeer};
    use crate::wire::{WireMessage, WireSender};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn identity(id: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            display_name: format!("User {id}"),
            email: None,
            avatar: None,
            profile_complete: true,
            token: Credential::new(format!("t-{id}")),
        }
    }

    fn manager() -> (
        ConnectionManager,
        InProcessFactory,
        mpsc::UnboundedReceiver<InProcessPeer>,
    ) {
        let (factory, peers) = InProcessFactory::new();
        let manager = ConnectionManager::new(Arc::new(factory.clone()));
        (manager, factory, peers)
    }

    #[tokio::test]
    async fn test_connect_sends_setup_and_publishes_connected() {
        let (manager, _factory, mut peers) = manager();
        let mut sub = manager.subscribe(&[EventKind::Connected]);

        manager.connect(&identity("u1")).await;
        assert!(manager.is_connected());

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(
            peer.events.recv().await.unwrap(),
            ClientEvent::Setup(SetupPayload {
                id: UserId::new("u1"),
                full_name: "User u1".into(),
            })
        );
        assert_eq!(sub.recv().await, Some(BusEvent::Connected));
    }

    #[tokio::test]
    async fn test_connect_failure_lands_disconnected() {
        let (manager, factory, _peers) = manager();
        factory.set_refuse(true);

        manager.connect(&identity("u1")).await;
        assert!(!manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::default());
    }

    #[tokio::test]
    async fn test_same_identity_reuses_connection() {
        let (manager, _factory, mut peers) = manager();
        manager.connect(&identity("u1")).await;
        manager.connect(&identity("u1")).await;

        let _peer = peers.recv().await.unwrap();
        assert!(peers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_identity_change_replaces_connection() {
        let (manager, _factory, mut peers) = manager();
        let mut sub = manager.subscribe(&EventKind::ALL);

        manager.connect(&identity("u1")).await;
        let first = peers.recv().await.unwrap();
        manager.connect(&identity("u2")).await;
        let second = peers.recv().await.unwrap();

        assert_eq!(first.user_id, UserId::new("u1"));
        assert_eq!(second.user_id, UserId::new("u2"));
        assert_eq!(manager.status().user_id, Some(UserId::new("u2")));

        assert_eq!(sub.recv().await, Some(BusEvent::Connected));
        assert!(matches!(
            sub.recv().await,
            Some(BusEvent::Disconnected { .. })
        ));
        assert_eq!(sub.recv().await, Some(BusEvent::Connected));

        // The old connection's server side can no longer reach subscribers
        let _ = first
            .server
            .send(ServerEvent::Typing(ConversationId::new("old")))
            .await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, _factory, _peers) = manager();
        manager.disconnect().await;

        manager.connect(&identity("u1")).await;
        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_join_room_noop_when_disconnected() {
        let (manager, _factory, _peers) = manager();
        manager.join_room(&ConversationId::new("c1")).await;
        let result = manager
            .emit(ClientEvent::Typing(ConversationId::new("c1")))
            .await;
        assert!(matches!(result, Err(TransportError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_inbound_events_reach_subscribers() {
        let (manager, _factory, mut peers) = manager();
        let mut sub = manager.subscribe(&[EventKind::MessageCreated, EventKind::TypingStarted]);
        manager.connect(&identity("u1")).await;
        let mut peer = peers.recv().await.unwrap();
        let _setup = peer.events.recv().await;

        manager.join_room(&ConversationId::new("c1")).await;
        assert_eq!(
            peer.events.recv().await.unwrap(),
            ClientEvent::JoinRoom(ConversationId::new("c1"))
        );

        peer.server
            .send(ServerEvent::Typing(ConversationId::new("c1")))
            .await
            .unwrap();
        // Malformed: user message without a sender
        peer.server
            .send(ServerEvent::MessageReceived(WireMessage {
                id: "bad".into(),
                chat: "c1".into(),
                sender: None,
                content: "?".into(),
                is_ai: false,
                is_edited: false,
                created_at: None,
                sender_name: None,
            }))
            .await
            .unwrap();
        peer.server
            .send(ServerEvent::MessageReceived(WireMessage {
                id: "m1".into(),
                chat: "c1".into(),
                sender: Some(WireSender::Id("u2".into())),
                content: "hi".into(),
                is_ai: false,
                is_edited: false,
                created_at: None,
                sender_name: None,
            }))
            .await
            .unwrap();

        assert_eq!(
            sub.recv().await,
            Some(BusEvent::TypingStarted(ConversationId::new("c1")))
        );
        match sub.recv().await {
            Some(BusEvent::MessageCreated(msg)) => assert_eq!(msg.key(), "m1"),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_setup_ack_sets_flag() {
        let (manager, _factory, mut peers) = manager();
        let mut status = manager.watch_status();
        manager.connect(&identity("u1")).await;
        let peer = peers.recv().await.unwrap();

        peer.server.send(ServerEvent::SetupAcknowledged).await.unwrap();
        let acknowledged = status
            .wait_for(|s| s.setup_acknowledged)
            .await
            .map(|s| s.setup_acknowledged)
            .unwrap();
        assert!(acknowledged);
    }

    #[tokio::test]
    async fn test_server_close_publishes_disconnected() {
        let (manager, _factory, mut peers) = manager();
        let mut sub = manager.subscribe(&[EventKind::Disconnected]);
        manager.connect(&identity("u1")).await;
        let peer = peers.recv().await.unwrap();

        drop(peer);
        assert!(matches!(
            sub.recv().await,
            Some(BusEvent::Disconnected { .. })
        ));
        assert!(!manager.is_connected());

        // A later connect for the same identity opens a fresh connection
        manager.connect(&identity("u1")).await;
        assert!(manager.is_connected());
        assert!(peers.recv().await.is_some());
    }

    /// Transport whose handshake waits until the test releases it
    struct GatedTransport {
        gate: Arc<tokio::sync::Notify>,
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl RealtimeTransport for GatedTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            self.gate.notified().await;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            self.dropped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _event: ClientEvent) -> Result<(), TransportError> {
            Ok(())
        }

        async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
            std::future::pending().await
        }

        fn try_recv(&mut self) -> Option<ServerEvent> {
            None
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    #[derive(Clone, Default)]
    struct GatedFactory {
        gate: Arc<tokio::sync::Notify>,
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    impl TransportFactory for GatedFactory {
        fn create(&self, _identity: &Identity) -> Result<Box<dyn RealtimeTransport>, TransportError> {
            Ok(Box::new(GatedTransport {
                gate: Arc::clone(&self.gate),
                dropped: Arc::clone(&self.dropped),
            }))
        }
    }

    async fn stalled_connect(
        factory: &GatedFactory,
    ) -> (ConnectionManager, tokio::task::JoinHandle<()>) {
        let manager = ConnectionManager::new(Arc::new(factory.clone()));
        let mut status = manager.watch_status();
        let connecting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&identity("u1")).await })
        };
        status
            .wait_for(|s| s.state == ConnectionState::Connecting)
            .await
            .unwrap();
        (manager, connecting)
    }

    #[tokio::test]
    async fn test_emit_fails_fast_while_handshake_in_flight() {
        let factory = GatedFactory::default();
        let (manager, _connecting) = stalled_connect(&factory).await;

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            manager.emit(ClientEvent::Typing(ConversationId::new("c1"))),
        )
        .await
        .expect("emit blocked behind the handshake");
        assert!(matches!(result, Err(TransportError::InvalidState(_))));

        tokio::time::timeout(
            Duration::from_secs(1),
            manager.join_room(&ConversationId::new("c1")),
        )
        .await
        .expect("join_room blocked behind the handshake");
    }

    #[tokio::test]
    async fn test_disconnect_abandons_handshake_in_flight() {
        let factory = GatedFactory::default();
        let (manager, connecting) = stalled_connect(&factory).await;
        let mut sub = manager.subscribe(&EventKind::ALL);

        tokio::time::timeout(Duration::from_secs(1), manager.disconnect())
            .await
            .expect("disconnect blocked behind the handshake");
        assert_eq!(manager.status(), ConnectionStatus::default());
        assert!(matches!(
            sub.recv().await,
            Some(BusEvent::Disconnected { .. })
        ));

        // The handshake completes late and must not resurrect the connection
        factory.gate.notify_one();
        connecting.await.unwrap();
        assert!(!manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::default());
        assert!(factory.dropped.load(Ordering::SeqCst));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_follow_session() {
        let (manager, _factory, mut peers) = manager();
        let session = SessionStore::new();
        let mut status = manager.watch_status();
        let _driver = manager.follow_session(&session);

        session.establish(identity("u1")).await;
        status
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(peers.recv().await.unwrap().user_id, UserId::new("u1"));

        session.logout().await;
        status
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
    }
}
