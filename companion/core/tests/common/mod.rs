//! Shared fixtures: in-memory REST backends and helpers for driving adapters

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use companion_core::api::{ApiError, ApiResult, AssistantApi, AssistantReply, GroupChatApi};
use companion_core::transport::{InProcessFactory, InProcessPeer};
use companion_core::{
    Author, ClientEvent, ConnectionManager, Conversation, ConversationId, Credential, Identity,
    Member, Message, MessageId, SessionStore, UserId,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn identity(id: &str, name: &str) -> Identity {
    Identity {
        user_id: UserId::new(id),
        display_name: name.to_string(),
        email: Some(format!("{id}@example.org")),
        avatar: None,
        profile_complete: true,
        token: Credential::new(format!("token-{id}")),
    }
}

pub async fn session_for(identity: &Identity) -> SessionStore {
    let session = SessionStore::new();
    session.establish(identity.clone()).await;
    session
}

pub fn member(id: &str, name: &str) -> Member {
    Member {
        id: UserId::new(id),
        display_name: name.to_string(),
    }
}

pub fn message(id: &str, conversation: &ConversationId, author: &str, body: &str) -> Message {
    Message::confirmed(
        MessageId::new(id),
        conversation.clone(),
        Author::User(UserId::new(author)),
        body,
    )
}

/// How the next call of a given kind should behave
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Network,
    Unauthorized,
}

impl Failure {
    fn error(self) -> ApiError {
        match self {
            Self::Network => ApiError::Status {
                status: 503,
                message: "service unavailable".into(),
            },
            Self::Unauthorized => ApiError::Unauthorized,
        }
    }
}

/// A gate that holds one call until the test opens it
#[derive(Default)]
pub struct Gate(Mutex<Option<oneshot::Receiver<()>>>);

impl Gate {
    pub fn close(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.0.lock() = Some(rx);
        tx
    }

    async fn pass(&self) {
        let held = self.0.lock().take();
        if let Some(rx) = held {
            let _ = rx.await;
        }
    }
}

// =============================================================================
// Group backend
// =============================================================================

pub struct FakeGroupApi {
    pub conversation: Conversation,
    pub author: UserId,
    pub history: Mutex<Vec<Message>>,
    pub sends: Mutex<Vec<String>>,
    pub send_gate: Gate,
    pub fetch_gate: Gate,
    /// Completed history fetches
    pub fetches: AtomicUsize,
    next_id: AtomicUsize,
    fail_next_send: Mutex<Option<Failure>>,
    fail_next_fetch: Mutex<Option<Failure>>,
    fail_next_edit: Mutex<Option<Failure>>,
}

impl FakeGroupApi {
    pub fn new(conversation: Conversation, author: &UserId) -> Arc<Self> {
        Arc::new(Self {
            conversation,
            author: author.clone(),
            history: Mutex::new(Vec::new()),
            sends: Mutex::new(Vec::new()),
            send_gate: Gate::default(),
            fetch_gate: Gate::default(),
            fetches: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_next_send: Mutex::new(None),
            fail_next_fetch: Mutex::new(None),
            fail_next_edit: Mutex::new(None),
        })
    }

    pub fn with_history(self: Arc<Self>, history: Vec<Message>) -> Arc<Self> {
        *self.history.lock() = history;
        self
    }

    pub fn fail_next_send(&self, failure: Failure) {
        *self.fail_next_send.lock() = Some(failure);
    }

    pub fn fail_next_fetch(&self, failure: Failure) {
        *self.fail_next_fetch.lock() = Some(failure);
    }

    pub fn fail_next_edit(&self, failure: Failure) {
        *self.fail_next_edit.lock() = Some(failure);
    }
}

#[async_trait]
impl GroupChatApi for FakeGroupApi {
    async fn group_conversation(&self) -> ApiResult<Conversation> {
        Ok(self.conversation.clone())
    }

    async fn fetch_messages(&self, conversation: &ConversationId) -> ApiResult<Vec<Message>> {
        self.fetch_gate.pass().await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.fail_next_fetch.lock().take() {
            return Err(failure.error());
        }
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| m.conversation_id == *conversation)
            .cloned()
            .collect())
    }

    async fn send_message(&self, conversation: &ConversationId, body: &str) -> ApiResult<Message> {
        self.send_gate.pass().await;
        if let Some(failure) = self.fail_next_send.lock().take() {
            return Err(failure.error());
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let confirmed = Message::confirmed(
            MessageId::new(format!("m{n}")),
            conversation.clone(),
            Author::User(self.author.clone()),
            body,
        );
        self.sends.lock().push(body.to_string());
        self.history.lock().push(confirmed.clone());
        Ok(confirmed)
    }

    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        body: &str,
    ) -> ApiResult<Message> {
        if let Some(failure) = self.fail_next_edit.lock().take() {
            return Err(failure.error());
        }
        let mut history = self.history.lock();
        let entry = history
            .iter_mut()
            .find(|m| m.server_id() == Some(message) && m.conversation_id == *conversation)
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "Message not found".into(),
            })?;
        entry.body = body.to_string();
        entry.edited = true;
        Ok(entry.clone())
    }
}

// =============================================================================
// Assistant backend
// =============================================================================

pub struct FakeAssistantApi {
    pub author: UserId,
    pub conversations: Mutex<Vec<Conversation>>,
    pub histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
    pub sends: Mutex<Vec<(ConversationId, String, Option<String>)>>,
    pub fetch_gate: Gate,
    pub send_gate: Gate,
    /// Title the server assigns after the next send
    pub retitle: Mutex<Option<String>>,
    /// Leave the echo out of send batches
    pub omit_echo: AtomicBool,
    next_id: AtomicUsize,
    fail_next_send: Mutex<Option<Failure>>,
}

impl FakeAssistantApi {
    pub fn new(author: &UserId) -> Arc<Self> {
        Arc::new(Self {
            author: author.clone(),
            conversations: Mutex::new(Vec::new()),
            histories: Mutex::new(HashMap::new()),
            sends: Mutex::new(Vec::new()),
            fetch_gate: Gate::default(),
            send_gate: Gate::default(),
            retitle: Mutex::new(None),
            omit_echo: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            fail_next_send: Mutex::new(None),
        })
    }

    pub fn add_conversation(&self, id: &str, title: &str, history: Vec<Message>) -> ConversationId {
        let id = ConversationId::new(id);
        self.conversations
            .lock()
            .push(Conversation::assistant(id.clone(), Some(title.to_string())));
        self.histories.lock().insert(id.clone(), history);
        id
    }

    pub fn fail_next_send(&self, failure: Failure) {
        *self.fail_next_send.lock() = Some(failure);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn find(&self, id: &ConversationId) -> ApiResult<Conversation> {
        self.conversations
            .lock()
            .iter()
            .find(|c| c.id == *id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "Chat not found".into(),
            })
    }
}

#[async_trait]
impl AssistantApi for FakeAssistantApi {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        Ok(self.conversations.lock().clone())
    }

    async fn create_conversation(&self) -> ApiResult<Conversation> {
        let conversation =
            Conversation::assistant(ConversationId::new(self.next_id("c")), Some("New Chat".into()));
        self.conversations.lock().insert(0, conversation.clone());
        self.histories
            .lock()
            .insert(conversation.id.clone(), Vec::new());
        Ok(conversation)
    }

    async fn delete_conversation(&self, conversation: &ConversationId) -> ApiResult<()> {
        self.find(conversation)?;
        self.conversations.lock().retain(|c| c.id != *conversation);
        self.histories.lock().remove(conversation);
        Ok(())
    }

    async fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> ApiResult<Conversation> {
        self.find(conversation)?;
        let mut conversations = self.conversations.lock();
        let mut renamed = None;
        for entry in conversations.iter_mut().filter(|c| c.id == *conversation) {
            entry.title = Some(title.to_string());
            renamed = Some(entry.clone());
        }
        renamed.ok_or(ApiError::Decode("vanished".into()))
    }

    async fn fetch_assistant_messages(
        &self,
        conversation: &ConversationId,
    ) -> ApiResult<Vec<Message>> {
        self.fetch_gate.pass().await;
        Ok(self
            .histories
            .lock()
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_assistant_message(
        &self,
        conversation: &ConversationId,
        body: &str,
        sender_name: Option<&str>,
    ) -> ApiResult<AssistantReply> {
        self.send_gate.pass().await;
        if let Some(failure) = self.fail_next_send.lock().take() {
            return Err(failure.error());
        }
        self.sends.lock().push((
            conversation.clone(),
            body.to_string(),
            sender_name.map(str::to_string),
        ));

        let mut echo = Message::confirmed(
            MessageId::new(self.next_id("a")),
            conversation.clone(),
            Author::User(self.author.clone()),
            body,
        );
        echo.display_name = sender_name.map(str::to_string);
        let reply = Message::confirmed(
            MessageId::new(self.next_id("a")),
            conversation.clone(),
            Author::Assistant,
            format!("You said: {body}"),
        );

        let mut new_messages = Vec::new();
        if !self.omit_echo.load(Ordering::SeqCst) {
            new_messages.push(echo);
        }
        new_messages.push(reply);
        self.histories
            .lock()
            .entry(conversation.clone())
            .or_default()
            .extend(new_messages.iter().cloned());

        if let Some(title) = self.retitle.lock().take() {
            for entry in self
                .conversations
                .lock()
                .iter_mut()
                .filter(|c| c.id == *conversation)
            {
                entry.title = Some(title.clone());
            }
        }

        Ok(AssistantReply {
            conversation: self.find(conversation)?,
            new_messages,
        })
    }
}

// =============================================================================
// Realtime helpers
// =============================================================================

/// Connect `manager` as `identity` and return the server side of the link,
/// with the `setup` announcement already consumed
pub async fn connect(
    manager: &ConnectionManager,
    peers: &mut mpsc::UnboundedReceiver<InProcessPeer>,
    identity: &Identity,
) -> InProcessPeer {
    manager.connect(identity).await;
    assert!(manager.is_connected());
    let mut peer = tokio::time::timeout(WAIT, peers.recv())
        .await
        .expect("no peer")
        .expect("factory dropped");
    match next_event(&mut peer).await {
        ClientEvent::Setup(payload) => assert_eq!(payload.id, identity.user_id),
        other => panic!("expected setup, got {other:?}"),
    }
    peer
}

pub fn manager() -> (ConnectionManager, mpsc::UnboundedReceiver<InProcessPeer>) {
    let (factory, peers) = InProcessFactory::new();
    (ConnectionManager::new(Arc::new(factory)), peers)
}

pub async fn next_event(peer: &mut InProcessPeer) -> ClientEvent {
    tokio::time::timeout(WAIT, peer.events.recv())
        .await
        .expect("timed out waiting for a client event")
        .expect("client side closed")
}

/// Wait until the watched view satisfies `predicate`
pub async fn wait_view<T: Clone>(
    rx: &mut watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for the view")
        .expect("adapter stopped")
        .clone()
}

pub fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.body.as_str()).collect()
}

pub fn keys(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.key().to_string()).collect()
}
