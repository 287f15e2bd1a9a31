//! Backend Wire Format
//!
//! JSON shapes exchanged with the family chat backend, over both REST and the
//! realtime bus. The backend uses document-store field names (`_id`, `chat`,
//! `isAI`, camelCase elsewhere); everything is translated into the types of
//! [`crate::messages`] at this boundary so nothing else depends on them.
//!
//! Conversion is fallible: a payload that deserializes but lacks what a
//! [`Message`] needs is rejected with [`PayloadError`] instead of producing a
//! half-valid entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{
    Author, Conversation, ConversationId, ConversationKind, Delivery, Member, Message, MessageId,
    UserId,
};

/// A payload that parsed as JSON but cannot become a domain value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// A required field is missing or empty
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A pending message cannot be put on the wire as a server message
    #[error("message {0} has no server id")]
    Unconfirmed(String),
}

/// Message author as the backend sends it: a bare id or a populated profile
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireSender {
    /// Populated sender document
    Profile {
        /// Identity id
        #[serde(rename = "_id")]
        id: String,
        /// Display name
        #[serde(rename = "fullName", default, skip_serializing_if = "Option::is_none")]
        full_name: Option<String>,
    },
    /// Unpopulated reference
    Id(String),
}

impl WireSender {
    fn id(&self) -> &str {
        match self {
            Self::Profile { id, .. } | Self::Id(id) => id,
        }
    }
}

/// Message document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Server id
    #[serde(rename = "_id")]
    pub id: String,
    /// Owning conversation
    #[serde(rename = "chat", alias = "conversation")]
    pub chat: String,
    /// Author (absent on assistant messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<WireSender>,
    /// Body text
    pub content: String,
    /// Whether the assistant wrote it
    #[serde(rename = "isAI", default)]
    pub is_ai: bool,
    /// Whether the body was edited
    #[serde(rename = "isEdited", default)]
    pub is_edited: bool,
    /// Creation time
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Speaker override (assistant conversations)
    #[serde(rename = "senderName", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl TryFrom<WireMessage> for Message {
    type Error = PayloadError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(PayloadError::MissingField("_id"));
        }
        if wire.chat.is_empty() {
            return Err(PayloadError::MissingField("chat"));
        }

        let author = if wire.is_ai {
            Author::Assistant
        } else {
            let sender = wire.sender.as_ref().ok_or(PayloadError::MissingField("sender"))?;
            Author::User(UserId::new(sender.id()))
        };

        Ok(Message {
            delivery: Delivery::Confirmed {
                id: MessageId(wire.id),
            },
            conversation_id: ConversationId(wire.chat),
            author,
            body: wire.content,
            edited: wire.is_edited,
            created_at: wire.created_at.unwrap_or_else(Utc::now),
            display_name: wire.sender_name,
        })
    }
}

impl TryFrom<&Message> for WireMessage {
    type Error = PayloadError;

    fn try_from(msg: &Message) -> Result<Self, Self::Error> {
        let id = msg
            .server_id()
            .ok_or_else(|| PayloadError::Unconfirmed(msg.key().to_string()))?;

        let (sender, is_ai) = match &msg.author {
            Author::User(user) => (Some(WireSender::Id(user.0.clone())), false),
            Author::Assistant => (None, true),
        };

        Ok(Self {
            id: id.0.clone(),
            chat: msg.conversation_id.0.clone(),
            sender,
            content: msg.body.clone(),
            is_ai,
            is_edited: msg.edited,
            created_at: Some(msg.created_at),
            sender_name: msg.display_name.clone(),
        })
    }
}

/// Decode a list of messages, dropping (and logging) any that are malformed
pub fn decode_messages(wire: Vec<WireMessage>) -> Vec<Message> {
    wire.into_iter()
        .filter_map(|w| {
            let id = w.id.clone();
            match Message::try_from(w) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "Dropping malformed message");
                    None
                }
            }
        })
        .collect()
}

/// Family member document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMember {
    /// Identity id
    #[serde(rename = "_id")]
    pub id: String,
    /// Display name
    #[serde(rename = "fullName", default)]
    pub full_name: String,
}

impl From<WireMember> for Member {
    fn from(wire: WireMember) -> Self {
        Self {
            id: UserId(wire.id),
            display_name: wire.full_name,
        }
    }
}

/// Payload of a member-deleted notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMemberRemoved {
    /// Removed identity id
    #[serde(rename = "memberId")]
    pub member_id: String,
}

/// Conversation document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireConversation {
    /// Conversation id
    #[serde(rename = "_id")]
    pub id: String,
    /// Title (assistant conversations)
    #[serde(default, alias = "chatName", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Participants (group conversation)
    #[serde(default, alias = "members")]
    pub users: Vec<WireMember>,
}

impl WireConversation {
    /// Convert into a conversation of the given kind
    pub fn into_conversation(self, kind: ConversationKind) -> Result<Conversation, PayloadError> {
        if self.id.is_empty() {
            return Err(PayloadError::MissingField("_id"));
        }
        let id = ConversationId(self.id);
        Ok(match kind {
            ConversationKind::Group => Conversation::group(
                id,
                self.users.into_iter().map(Member::from).collect(),
            ),
            ConversationKind::Assistant => Conversation::assistant(id, self.title),
        })
    }
}

/// Response to an assistant send: the (possibly retitled) conversation and
/// the messages the call produced
#[derive(Clone, Debug, Deserialize)]
pub struct WireAssistantReply {
    /// Conversation after the call
    #[serde(alias = "chat")]
    pub conversation: WireConversation,
    /// Messages created by the call, in order
    #[serde(rename = "newMessages", default)]
    pub new_messages: Vec<WireMessage>,
}

/// Login response
#[derive(Clone, Debug, Deserialize)]
pub struct WireLogin {
    /// Identity id
    #[serde(rename = "_id")]
    pub id: String,
    /// Bearer credential
    pub token: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if the login response already carries it
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
}

/// Profile document
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WireProfile {
    /// Display name
    #[serde(rename = "fullName", default)]
    pub full_name: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Avatar reference (URL)
    #[serde(alias = "profilePicture", default)]
    pub avatar: Option<String>,
    /// Whether the onboarding profile is complete
    #[serde(rename = "isProfileComplete", default)]
    pub is_profile_complete: bool,
}

/// Server error body
#[derive(Clone, Debug, Deserialize)]
pub struct WireError {
    /// Human-readable message
    pub message: String,
}
