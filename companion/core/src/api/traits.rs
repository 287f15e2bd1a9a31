//! REST Collaborator Traits
//!
//! The request/response side of the backend, split by the component that
//! consumes it. Adapters depend on these traits, not on [`HttpApiClient`],
//! so tests can drive them with in-memory fakes.
//!
//! [`HttpApiClient`]: super::HttpApiClient

use async_trait::async_trait;

use super::error::ApiResult;
use crate::messages::{Conversation, ConversationId, Message, MessageId, UserId};
use crate::session::Credential;

/// Result of a successful credential check
#[derive(Clone, Debug)]
pub struct LoginGrant {
    /// Identity id
    pub user_id: UserId,
    /// Issued bearer credential
    pub token: Credential,
    /// Email address, if echoed back
    pub email: Option<String>,
    /// Display name, if the login response carries one
    pub display_name: Option<String>,
}

/// Profile fields merged into the identity at login
#[derive(Clone, Debug, Default)]
pub struct Profile {
    /// Display name
    pub display_name: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Avatar reference
    pub avatar: Option<String>,
    /// Whether onboarding is complete
    pub profile_complete: bool,
}

/// New account request
#[derive(Clone, Debug)]
pub struct Registration {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
    /// Password confirmation (checked server-side)
    pub confirm_password: String,
}

/// Result of an assistant send: the conversation as the server now sees it
/// (its title may have been recomputed) and every message the call created
#[derive(Clone, Debug)]
pub struct AssistantReply {
    /// Conversation after the call
    pub conversation: Conversation,
    /// New messages, in server order (typically the echo, then the reply)
    pub new_messages: Vec<Message>,
}

/// Credential issuance
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Check credentials and issue a bearer token
    async fn login(&self, email: &str, password: &str) -> ApiResult<LoginGrant>;

    /// Fetch the profile of the identity owning `token`
    async fn profile(&self, token: &Credential) -> ApiResult<Profile>;

    /// Create an account (does not log in)
    async fn register(&self, registration: &Registration) -> ApiResult<()>;
}

/// Family group conversation
#[async_trait]
pub trait GroupChatApi: Send + Sync {
    /// The single group conversation of the caller's family
    async fn group_conversation(&self) -> ApiResult<Conversation>;

    /// Full history of a conversation
    async fn fetch_messages(&self, conversation: &ConversationId) -> ApiResult<Vec<Message>>;

    /// Persist a new message; returns the server-confirmed copy
    async fn send_message(&self, conversation: &ConversationId, body: &str) -> ApiResult<Message>;

    /// Replace a message body; returns the server-confirmed edited copy
    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        body: &str,
    ) -> ApiResult<Message>;
}

/// Assistant conversations (request/response only)
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Conversations owned by the caller, most recent first
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>>;

    /// Create an empty conversation
    async fn create_conversation(&self) -> ApiResult<Conversation>;

    /// Delete a conversation
    async fn delete_conversation(&self, conversation: &ConversationId) -> ApiResult<()>;

    /// Rename a conversation; returns it with the new title
    async fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> ApiResult<Conversation>;

    /// Full history of a conversation
    async fn fetch_assistant_messages(
        &self,
        conversation: &ConversationId,
    ) -> ApiResult<Vec<Message>>;

    /// Send a message and receive the batch it produced
    async fn send_assistant_message(
        &self,
        conversation: &ConversationId,
        body: &str,
        sender_name: Option<&str>,
    ) -> ApiResult<AssistantReply>;
}
