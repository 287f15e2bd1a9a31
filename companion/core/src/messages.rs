//! Conversation Data Model
//!
//! Identifiers, messages and conversations as the synchronization core sees
//! them. These are the client-side types; the JSON shapes the backend speaks
//! live in [`crate::wire`] and convert into these.
//!
//! # Optimistic Messages
//!
//! A message is either still local (`Delivery::Pending`, keyed by a temporary
//! id minted on this client) or acknowledged by the server
//! (`Delivery::Confirmed`, keyed by the server-assigned id). Reconciliation in
//! [`crate::sync`] swaps the former for the latter in place.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Wrap a server id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-minted identifier for a message that has not been confirmed yet
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub String);

impl TempId {
    /// Generate a fresh temporary id
    #[must_use]
    pub fn new() -> Self {
        Self(format!("tmp_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversation identifier (also the realtime room name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap a server id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap a server id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who wrote a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Author {
    /// A family member
    User(UserId),
    /// The AI assistant
    Assistant,
}

impl Author {
    /// Whether the assistant wrote this
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant)
    }

    /// Whether `user` wrote this
    #[must_use]
    pub fn is_user(&self, user: &UserId) -> bool {
        matches!(self, Self::User(id) if id == user)
    }
}

/// Delivery state of a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// Shown locally, server round trip outstanding (or failed)
    Pending {
        /// Temporary id assigned at creation
        temp_id: TempId,
        /// The send round trip failed; the entry stays for a retry
        failed: bool,
    },
    /// Acknowledged by the server
    Confirmed {
        /// Server-assigned id
        id: MessageId,
    },
}

/// A message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Pending or confirmed, with the matching id
    pub delivery: Delivery,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Who wrote it
    pub author: Author,
    /// Body text
    pub body: String,
    /// Whether the body was edited after creation
    pub edited: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Speaker name shown instead of the author's (assistant surface only)
    pub display_name: Option<String>,
}

impl Message {
    /// Create an optimistic local message with a fresh temporary id
    pub fn pending(
        conversation_id: ConversationId,
        author: UserId,
        body: impl Into<String>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            delivery: Delivery::Pending {
                temp_id: TempId::new(),
                failed: false,
            },
            conversation_id,
            author: Author::User(author),
            body: body.into(),
            edited: false,
            created_at: Utc::now(),
            display_name,
        }
    }

    /// Create a server-confirmed message
    pub fn confirmed(
        id: MessageId,
        conversation_id: ConversationId,
        author: Author,
        body: impl Into<String>,
    ) -> Self {
        Self {
            delivery: Delivery::Confirmed { id },
            conversation_id,
            author,
            body: body.into(),
            edited: false,
            created_at: Utc::now(),
            display_name: None,
        }
    }

    /// Server id, if confirmed
    #[must_use]
    pub fn server_id(&self) -> Option<&MessageId> {
        match &self.delivery {
            Delivery::Confirmed { id } => Some(id),
            Delivery::Pending { .. } => None,
        }
    }

    /// Temporary id, if still pending
    #[must_use]
    pub fn temp_id(&self) -> Option<&TempId> {
        match &self.delivery {
            Delivery::Pending { temp_id, .. } => Some(temp_id),
            Delivery::Confirmed { .. } => None,
        }
    }

    /// Whether the server has not confirmed this message yet
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    /// Whether the send round trip for this message failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { failed: true, .. })
    }

    /// Stable key for rendering (temporary or server id)
    #[must_use]
    pub fn key(&self) -> &str {
        match &self.delivery {
            Delivery::Pending { temp_id, .. } => &temp_id.0,
            Delivery::Confirmed { id } => &id.0,
        }
    }
}

/// Kind of conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationKind {
    /// The single family-wide chat
    Group,
    /// A chat with the AI assistant
    Assistant,
}

/// A family member as seen by the chat
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Identity id
    pub id: UserId,
    /// Name to display
    pub display_name: String,
}

/// Conversation metadata (the message list is owned by the synchronizer)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: ConversationId,
    /// Group or assistant
    pub kind: ConversationKind,
    /// Title (assistant conversations only; the server may recompute it)
    pub title: Option<String>,
    /// Participants (group conversations only)
    pub participants: Vec<Member>,
}

impl Conversation {
    /// Create a group conversation
    pub fn group(id: ConversationId, participants: Vec<Member>) -> Self {
        Self {
            id,
            kind: ConversationKind::Group,
            title: None,
            participants,
        }
    }

    /// Create an assistant conversation
    pub fn assistant(id: ConversationId, title: Option<String>) -> Self {
        Self {
            id,
            kind: ConversationKind::Assistant,
            title,
            participants: Vec::new(),
        }
    }
}
