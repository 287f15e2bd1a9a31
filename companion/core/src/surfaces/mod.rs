//! Conversation Surface Adapters
//!
//! Adapters wire a [`ConversationSync`] to its collaborators and expose the
//! result to the presentation layer:
//!
//! - [`GroupChat`]: family group conversation, REST plus realtime fan-out
//! - [`AssistantChat`]: assistant conversations, REST only
//!
//! # Design Philosophy
//!
//! Each mounted adapter is an actor. One task owns the synchronizer and is
//! the only place that mutates it, so every reconciliation step is applied
//! atomically and in arrival order. Network round trips run in their own
//! tasks and report back through a completion channel; the actor keeps
//! serving commands and bus events while they are in flight.
//!
//! The presentation layer talks to a handle: intents go in as commands,
//! state comes out as a `watch` of an immutable view.
//!
//! Network failures never escape as panics or unhandled errors. They end up
//! as a [`ChatError`] in the view (and in the reply to the intent that
//! caused them); a rejected credential additionally invalidates the session.
//!
//! [`ConversationSync`]: crate::sync::ConversationSync

pub mod assistant;
pub mod group;

pub use assistant::{AssistantChat, AssistantChatHandle, AssistantView};
pub use group::{GroupChat, GroupChatHandle, GroupView};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::api::ApiError;
use crate::messages::{ConversationId, Message};
use crate::session::SessionStore;
use crate::sync::{ConversationSync, TypingIndicator};

/// Errors visible to the presentation layer
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The credential was rejected or is missing; log in again
    #[error("session is no longer valid")]
    SessionInvalid,

    /// Recoverable network or server failure
    #[error("network error: {0}")]
    Network(String),

    /// No conversation is selected, or the id is unknown
    #[error("no such conversation")]
    NoConversation,

    /// The target message is not in the conversation (or cannot be retried)
    #[error("no such message")]
    UnknownMessage,

    /// Message body is empty
    #[error("message is empty")]
    EmptyMessage,

    /// The adapter has shut down
    #[error("conversation adapter stopped")]
    Stopped,
}

/// Reply channel for one intent
pub(crate) type Reply<T> = oneshot::Sender<Result<T, ChatError>>;

/// Reconciled state of one conversation, as the presentation layer sees it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConversationView {
    /// Conversation shown (`None`: nothing selected)
    pub conversation_id: Option<ConversationId>,
    /// Title, when the conversation has one
    pub title: Option<String>,
    /// Ordered message sequence
    pub messages: Vec<Message>,
    /// Someone else is typing
    pub remote_typing: bool,
    /// The local user is typing
    pub local_typing: bool,
    /// A snapshot load is in flight
    pub loading: bool,
    /// Last failure, cleared by the next success
    pub error: Option<ChatError>,
}

impl ConversationView {
    pub(crate) fn capture(
        sync: &ConversationSync,
        typing: Option<&TypingIndicator>,
        title: Option<String>,
        loading: bool,
        error: Option<ChatError>,
    ) -> Self {
        Self {
            conversation_id: Some(sync.conversation_id().clone()),
            title,
            messages: sync.messages().to_vec(),
            remote_typing: sync.remote_typing(),
            local_typing: typing.is_some_and(TypingIndicator::is_typing),
            loading,
            error,
        }
    }
}

/// Turn a REST failure into what the presentation layer sees
///
/// A rejected credential invalidates the session as a side effect.
pub(crate) async fn classify(session: &SessionStore, error: ApiError) -> ChatError {
    if error.is_session_invalid() {
        tracing::warn!(error = %error, "Credential rejected; invalidating session");
        session.invalidate().await;
        ChatError::SessionInvalid
    } else {
        tracing::warn!(error = %error, "Request failed");
        ChatError::Network(error.to_string())
    }
}

/// Send a command built around a fresh reply channel and wait for the answer
pub(crate) async fn request<C, T>(
    commands: &mpsc::Sender<C>,
    make: impl FnOnce(Reply<T>) -> C,
) -> Result<T, ChatError> {
    let (tx, rx) = oneshot::channel();
    commands
        .send(make(tx))
        .await
        .map_err(|_| ChatError::Stopped)?;
    rx.await.map_err(|_| ChatError::Stopped)?
}

/// Answer an intent; the caller may have gone away
pub(crate) fn respond<T>(reply: Reply<T>, result: Result<T, ChatError>) {
    let _ = reply.send(result);
}

/// Replies held back until the view reflecting them is published
///
/// An intent that resolves can then rely on the view being current.
#[derive(Default)]
pub(crate) struct Outbox(Vec<Box<dyn FnOnce() + Send + Sync>>);

impl Outbox {
    pub(crate) fn push<T: Send + Sync + 'static>(&mut self, reply: Reply<T>, result: Result<T, ChatError>) {
        self.0.push(Box::new(move || respond(reply, result)));
    }

    pub(crate) fn flush(&mut self) {
        for deliver in self.0.drain(..) {
            deliver();
        }
    }
}

/// Trimmed body, or `EmptyMessage`
pub(crate) fn normalize_body(body: &str) -> Result<String, ChatError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        Err(ChatError::EmptyMessage)
    } else {
        Ok(trimmed.to_string())
    }
}
