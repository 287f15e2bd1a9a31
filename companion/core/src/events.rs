//! Realtime Events
//!
//! The three event vocabularies of the realtime layer:
//!
//! - [`ClientEvent`]: what this client emits on the wire (setup, room joins,
//!   typing signals and the client-driven message fan-out)
//! - [`ServerEvent`]: what the backend pushes on the wire
//! - [`BusEvent`]: the typed, already-decoded events the
//!   [`ConnectionManager`](crate::realtime::ConnectionManager) publishes to
//!   subscribers
//!
//! # Design Philosophy
//!
//! Wire events carry backend document shapes; bus events carry domain types.
//! The decode step between them is the one place a malformed payload can be
//! rejected, so subscribers never see a half-decoded message.

use serde::{Deserialize, Serialize};

use crate::messages::{ConversationId, Member, Message, UserId};
use crate::wire::{PayloadError, WireMember, WireMemberRemoved, WireMessage};

/// Identity announcement sent right after the transport opens
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetupPayload {
    /// Identity id
    #[serde(rename = "_id")]
    pub id: UserId,
    /// Display name
    #[serde(rename = "fullName")]
    pub full_name: String,
}

/// Events from this client to the realtime server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce the authenticated identity
    #[serde(rename = "setup")]
    Setup(SetupPayload),

    /// Join a conversation's room (additive)
    #[serde(rename = "join chat")]
    JoinRoom(ConversationId),

    /// Local user started typing
    #[serde(rename = "typing")]
    Typing(ConversationId),

    /// Local user stopped typing
    #[serde(rename = "stop typing")]
    StopTyping(ConversationId),

    /// Fan a confirmed message out to the other participants
    #[serde(rename = "new message")]
    NewMessage(WireMessage),

    /// Fan a confirmed edit out to the other participants
    #[serde(rename = "edit message")]
    EditMessage(WireMessage),
}

impl ClientEvent {
    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::JoinRoom(_) => "join chat",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop typing",
            Self::NewMessage(_) => "new message",
            Self::EditMessage(_) => "edit message",
        }
    }
}

/// Events pushed by the realtime server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Acknowledges `setup`
    #[serde(rename = "connected")]
    SetupAcknowledged,

    /// Another participant's message
    #[serde(rename = "message received")]
    MessageReceived(WireMessage),

    /// Another participant's edit
    #[serde(rename = "message edited")]
    MessageEdited(WireMessage),

    /// Someone in the room started typing
    #[serde(rename = "typing")]
    Typing(ConversationId),

    /// Someone in the room stopped typing
    #[serde(rename = "stop typing")]
    StopTyping(ConversationId),

    /// A family member joined
    #[serde(rename = "family member added")]
    MemberAdded(WireMember),

    /// A family member was removed
    #[serde(rename = "family member deleted")]
    MemberDeleted(WireMemberRemoved),
}

/// Kinds of bus event, used to filter subscriptions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Transport connected and identity announced
    Connected,
    /// Transport gone
    Disconnected,
    /// A message was created remotely
    MessageCreated,
    /// A message was edited remotely
    MessageEdited,
    /// A remote participant started typing
    TypingStarted,
    /// A remote participant stopped typing
    TypingStopped,
    /// The family roster changed
    MembershipChanged,
}

impl EventKind {
    /// Every kind
    pub const ALL: [EventKind; 7] = [
        Self::Connected,
        Self::Disconnected,
        Self::MessageCreated,
        Self::MessageEdited,
        Self::TypingStarted,
        Self::TypingStopped,
        Self::MembershipChanged,
    ];
}

/// Family roster change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    /// Member joined
    Added(Member),
    /// Member removed
    Removed(UserId),
}

/// Decoded events published on the bus
#[derive(Clone, Debug, PartialEq)]
pub enum BusEvent {
    /// Transport connected and `setup` sent
    Connected,
    /// Transport closed or failed
    Disconnected {
        /// Why
        reason: String,
    },
    /// Remote message created
    MessageCreated(Message),
    /// Remote message edited
    MessageEdited(Message),
    /// Remote typing started in a conversation
    TypingStarted(ConversationId),
    /// Remote typing stopped in a conversation
    TypingStopped(ConversationId),
    /// Family roster changed
    MembershipChanged(MembershipChange),
}

impl BusEvent {
    /// Kind of this event
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::MessageCreated(_) => EventKind::MessageCreated,
            Self::MessageEdited(_) => EventKind::MessageEdited,
            Self::TypingStarted(_) => EventKind::TypingStarted,
            Self::TypingStopped(_) => EventKind::TypingStopped,
            Self::MembershipChanged(_) => EventKind::MembershipChanged,
        }
    }

    /// Conversation the event is scoped to, if any
    #[must_use]
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::MessageCreated(msg) | Self::MessageEdited(msg) => Some(&msg.conversation_id),
            Self::TypingStarted(id) | Self::TypingStopped(id) => Some(id),
            _ => None,
        }
    }
}

impl ServerEvent {
    /// Decode into a bus event
    ///
    /// Returns `Ok(None)` for events that are handled by the connection
    /// itself rather than published (the setup acknowledgment).
    pub fn into_bus_event(self) -> Result<Option<BusEvent>, PayloadError> {
        Ok(match self {
            Self::SetupAcknowledged => None,
            Self::MessageReceived(wire) => Some(BusEvent::MessageCreated(Message::try_from(wire)?)),
            Self::MessageEdited(wire) => Some(BusEvent::MessageEdited(Message::try_from(wire)?)),
            Self::Typing(id) => Some(BusEvent::TypingStarted(id)),
            Self::StopTyping(id) => Some(BusEvent::TypingStopped(id)),
            Self::MemberAdded(member) => {
                if member.id.is_empty() {
                    return Err(PayloadError::MissingField("_id"));
                }
                Some(BusEvent::MembershipChanged(MembershipChange::Added(
                    Member::from(member),
                )))
            }
            Self::MemberDeleted(removed) => {
                if removed.member_id.is_empty() {
                    return Err(PayloadError::MissingField("memberId"));
                }
                Some(BusEvent::MembershipChanged(MembershipChange::Removed(
                    UserId(removed.member_id),
                )))
            }
        })
    }
}
