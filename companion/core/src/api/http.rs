//! HTTP implementation of the REST collaborators

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::error::{ApiError, ApiResult};
use super::traits::{
    AssistantApi, AssistantReply, AuthApi, GroupChatApi, LoginGrant, Profile, Registration,
};
use crate::messages::{Conversation, ConversationId, ConversationKind, Message, MessageId, UserId};
use crate::session::{Credential, SessionStore};
use crate::wire::{
    decode_messages, WireAssistantReply, WireConversation, WireError, WireLogin, WireMessage,
    WireProfile,
};

/// Maximum error body kept in `ApiError::Status`
const MAX_ERROR_BODY_SIZE: usize = 1000;

/// REST client for the family chat backend
///
/// Every call except login and register carries the bearer credential of the
/// [`SessionStore`] it was built with. Requests have no client-side timeout.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    http: Client,
    base_url: String,
    session: SessionStore,
}

impl HttpApiClient {
    /// Create a client for `base_url` (e.g. `http://localhost:5000/api`)
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> ApiResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("family-companion/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(base_url, session, http))
    }

    /// Create a client with a custom HTTP client
    pub fn with_client(base_url: impl Into<String>, session: SessionStore, http: Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> ApiResult<RequestBuilder> {
        let token = self.session.token().ok_or(ApiError::NoSession)?;
        Ok(request.bearer_auth(token.expose()))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let body = Self::checked(request).await?.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn checked(request: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "REST response");

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&text)
                .map(|e| e.message)
                .unwrap_or_else(|_| truncate(text, status));
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn message(&self, request: RequestBuilder) -> ApiResult<Message> {
        let wire: WireMessage = self.execute(request).await?;
        Message::try_from(wire).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn messages(&self, request: RequestBuilder) -> ApiResult<Vec<Message>> {
        let wire: Vec<WireMessage> = self.execute(request).await?;
        Ok(decode_messages(wire))
    }

    async fn conversation(
        &self,
        request: RequestBuilder,
        kind: ConversationKind,
    ) -> ApiResult<Conversation> {
        let wire: WireConversation = self.execute(request).await?;
        wire.into_conversation(kind)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn truncate(body: String, status: StatusCode) -> String {
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    if body.len() <= MAX_ERROR_BODY_SIZE {
        return body;
    }
    let cut = body
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|i| *i <= MAX_ERROR_BODY_SIZE)
        .last()
        .unwrap_or(0);
    format!("{}... (truncated)", &body[..cut])
}

#[async_trait::async_trait]
impl AuthApi for HttpApiClient {
    async fn login(&self, email: &str, password: &str) -> ApiResult<LoginGrant> {
        let request = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "email": email, "password": password }));
        let wire: WireLogin = self.execute(request).await?;
        Ok(LoginGrant {
            user_id: UserId(wire.id),
            token: Credential::new(wire.token),
            email: wire.email,
            display_name: wire.full_name,
        })
    }

    async fn profile(&self, token: &Credential) -> ApiResult<Profile> {
        let request = self
            .http
            .get(self.url("/profile"))
            .bearer_auth(token.expose());
        let wire: WireProfile = self.execute(request).await?;
        Ok(Profile {
            display_name: wire.full_name,
            email: wire.email,
            avatar: wire.avatar,
            profile_complete: wire.is_profile_complete,
        })
    }

    async fn register(&self, registration: &Registration) -> ApiResult<()> {
        let request = self.http.post(self.url("/register")).json(&json!({
            "email": registration.email,
            "password": registration.password,
            "confirmPassword": registration.confirm_password,
        }));
        Self::checked(request).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl GroupChatApi for HttpApiClient {
    async fn group_conversation(&self) -> ApiResult<Conversation> {
        let request = self.authorized(self.http.get(self.url("/conversations/group")))?;
        self.conversation(request, ConversationKind::Group).await
    }

    async fn fetch_messages(&self, conversation: &ConversationId) -> ApiResult<Vec<Message>> {
        let url = self.url(&format!("/conversations/{conversation}/messages"));
        let request = self.authorized(self.http.get(url))?;
        self.messages(request).await
    }

    async fn send_message(&self, conversation: &ConversationId, body: &str) -> ApiResult<Message> {
        let url = self.url(&format!("/conversations/{conversation}/message"));
        let request = self.authorized(self.http.post(url).json(&json!({ "content": body })))?;
        self.message(request).await
    }

    async fn edit_message(
        &self,
        conversation: &ConversationId,
        message: &MessageId,
        body: &str,
    ) -> ApiResult<Message> {
        let url = self.url(&format!("/conversations/{conversation}/messages/{message}"));
        let request = self.authorized(self.http.put(url).json(&json!({ "content": body })))?;
        self.message(request).await
    }
}

#[async_trait::async_trait]
impl AssistantApi for HttpApiClient {
    async fn list_conversations(&self) -> ApiResult<Vec<Conversation>> {
        let request = self.authorized(self.http.get(self.url("/ai-conversations")))?;
        let wire: Vec<WireConversation> = self.execute(request).await?;
        wire.into_iter()
            .map(|c| {
                c.into_conversation(ConversationKind::Assistant)
                    .map_err(|e| ApiError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn create_conversation(&self) -> ApiResult<Conversation> {
        let request = self.authorized(self.http.post(self.url("/ai-conversations")).json(&json!({})))?;
        self.conversation(request, ConversationKind::Assistant).await
    }

    async fn delete_conversation(&self, conversation: &ConversationId) -> ApiResult<()> {
        let url = self.url(&format!("/ai-conversations/{conversation}"));
        let request = self.authorized(self.http.delete(url))?;
        Self::checked(request).await?;
        Ok(())
    }

    async fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> ApiResult<Conversation> {
        let url = self.url(&format!("/ai-conversations/{conversation}/title"));
        let request = self.authorized(self.http.put(url).json(&json!({ "title": title })))?;
        self.conversation(request, ConversationKind::Assistant).await
    }

    async fn fetch_assistant_messages(
        &self,
        conversation: &ConversationId,
    ) -> ApiResult<Vec<Message>> {
        let url = self.url(&format!("/ai-conversations/{conversation}/messages"));
        let request = self.authorized(self.http.get(url))?;
        self.messages(request).await
    }

    async fn send_assistant_message(
        &self,
        conversation: &ConversationId,
        body: &str,
        sender_name: Option<&str>,
    ) -> ApiResult<AssistantReply> {
        let url = self.url(&format!("/ai-conversations/{conversation}/message"));
        let request = self.authorized(
            self.http
                .post(url)
                .json(&json!({ "content": body, "senderName": sender_name })),
        )?;
        let wire: WireAssistantReply = self.execute(request).await?;
        let conversation = wire
            .conversation
            .into_conversation(ConversationKind::Assistant)
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(AssistantReply {
            conversation,
            new_messages: decode_messages(wire.new_messages),
        })
    }
}
