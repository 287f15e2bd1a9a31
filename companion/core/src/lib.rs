//! Companion Core - Chat Reconciliation for the Family Health Companion
//!
//! This crate keeps each conversation's message sequence correct while three
//! sources race to change it: snapshots fetched over REST, optimistic local
//! sends, and events pushed over the realtime connection. It has no UI; a
//! presentation layer reads the reconciled views and sends intents.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Presentation Layer                            │
//! │            (terminal driver, or any other front end)              │
//! └───────────────┬──────────────────────────────▲───────────────────┘
//!                 │ intents                      │ watch<View>
//! ┌───────────────▼──────────────────────────────┴───────────────────┐
//! │                   Surface Adapters (actors)                       │
//! │   ┌──────────────────────────┐   ┌──────────────────────────────┐ │
//! │   │        GroupChat         │   │        AssistantChat         │ │
//! │   │  REST + realtime fan-out │   │  REST batches, titles, list  │ │
//! │   └────────────┬─────────────┘   └──────────────┬───────────────┘ │
//! │                │      ConversationSync          │                 │
//! │                │      TypingIndicator           │                 │
//! └────────────────┼────────────────────────────────┼─────────────────┘
//!        bus events│                                │
//! ┌────────────────┴──────────┐   ┌─────────────────▼─────────────────┐
//! │   ConnectionManager       │   │         HttpApiClient             │
//! │   EventBus, one transport │   │   AuthApi / GroupChatApi /        │
//! │   (WebSocket, in-process) │   │   AssistantApi                    │
//! └────────────────┬──────────┘   └─────────────────┬─────────────────┘
//!                  └──────────────┬─────────────────┘
//!                          SessionStore (identity, credential)
//! ```
//!
//! # Key Types
//!
//! - [`SessionStore`]: the authenticated identity, observable and persisted
//! - [`ConnectionManager`]: the single realtime connection and its event bus
//! - [`ConversationSync`]: ordered, duplicate-free sequence for one conversation
//! - [`TypingIndicator`]: debounced local typing signal
//! - [`GroupChat`] / [`AssistantChat`]: adapters that wire it all together
//!
//! # Module Overview
//!
//! - [`api`]: REST collaborators and their `reqwest` implementation
//! - [`config`]: layered configuration (TOML, environment, CLI)
//! - [`events`]: realtime wire events and decoded bus events
//! - [`messages`]: domain types (messages, conversations, ids)
//! - [`realtime`]: connection manager and event bus
//! - [`session`]: session store
//! - [`surfaces`]: group and assistant adapters
//! - [`sync`]: conversation synchronizer and typing machine
//! - [`transport`]: realtime transports (WebSocket, in-process)
//! - [`wire`]: backend JSON shapes

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod events;
pub mod messages;
pub mod realtime;
pub mod session;
pub mod surfaces;
pub mod sync;
pub mod transport;
pub mod wire;

// Re-exports for convenience
pub use api::{ApiError, ApiResult, AssistantApi, AuthApi, GroupChatApi, HttpApiClient};
pub use config::{
    default_config_path, load_config, load_config_from_path, resolve_config, ClientConfig,
    ConfigError, ConfigOverrides, ConfigSource,
};
pub use events::{BusEvent, ClientEvent, EventKind, MembershipChange, ServerEvent};
pub use messages::{
    Author, Conversation, ConversationId, ConversationKind, Delivery, Member, Message, MessageId,
    TempId, UserId,
};
pub use realtime::{ConnectionManager, ConnectionState, ConnectionStatus, EventBus, Subscription};
pub use session::{Credential, Identity, SessionError, SessionState, SessionStore};
pub use surfaces::{
    AssistantChat, AssistantChatHandle, AssistantView, ChatError, ConversationView, GroupChat,
    GroupChatHandle, GroupView,
};
pub use sync::{ConfirmOutcome, ConversationSync, TypingIndicator, TypingSignal};
pub use transport::{RealtimeTransport, TransportError, TransportFactory};
