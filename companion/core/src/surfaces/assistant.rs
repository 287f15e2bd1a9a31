//! Assistant chat adapter
//!
//! Request/response only: there is no realtime traffic. A send appends the
//! optimistic entry, then one call returns the batch of messages it produced
//! (normally the echo of the send followed by the assistant's reply). The
//! batch is reconciled against the pending entry, and a title recomputed by
//! the server is copied into both the selection and the conversation list.
//!
//! The adapter also manages the list of conversations: listing selects the
//! first one when nothing is selected, creating one selects it and sends the
//! `start` message that makes the assistant greet, and deleting the selected
//! conversation clears the selection.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{
    classify, normalize_body, request, respond, ChatError, ConversationView, Outbox, Reply,
};
use crate::api::{ApiResult, AssistantApi, AssistantReply};
use crate::config::ChatConfig;
use crate::messages::{Conversation, ConversationId, Message, TempId, UserId};
use crate::session::SessionStore;
use crate::sync::{ConversationSync, Ticket};

/// Body that asks the assistant to open a new conversation
pub const GREETING_TRIGGER: &str = "start";

/// What the presentation layer sees of the assistant surface
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantView {
    /// Conversations, most recent first
    pub conversations: Vec<Conversation>,
    /// Selected conversation (empty view when nothing is selected)
    pub current: ConversationView,
    /// The assistant is working on a reply
    pub awaiting_reply: bool,
}

enum Command {
    Refresh {
        reply: Reply<Vec<Conversation>>,
    },
    Create {
        reply: Reply<Conversation>,
    },
    Select {
        id: ConversationId,
        reply: Reply<()>,
    },
    Delete {
        id: ConversationId,
        reply: Reply<()>,
    },
    Rename {
        id: ConversationId,
        title: String,
        reply: Reply<Conversation>,
    },
    Send {
        body: String,
        speaker: Option<String>,
        reply: Reply<Message>,
    },
    Retry {
        temp_id: TempId,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

enum Completion {
    Listed {
        result: ApiResult<Vec<Conversation>>,
        reply: Reply<Vec<Conversation>>,
    },
    Created {
        result: ApiResult<Conversation>,
        reply: Reply<Conversation>,
    },
    Deleted {
        id: ConversationId,
        result: ApiResult<()>,
        reply: Reply<()>,
    },
    Renamed {
        result: ApiResult<Conversation>,
        reply: Reply<Conversation>,
    },
    Snapshot {
        ticket: Ticket,
        result: ApiResult<Vec<Message>>,
    },
    Answered {
        conversation_id: ConversationId,
        temp_id: Option<TempId>,
        result: ApiResult<AssistantReply>,
    },
}

/// Builder for the assistant surface
pub struct AssistantChat {
    api: Arc<dyn AssistantApi>,
    session: SessionStore,
    config: ChatConfig,
}

impl AssistantChat {
    /// Adapter over the given collaborators, with default chat settings
    pub fn new(api: Arc<dyn AssistantApi>, session: SessionStore) -> Self {
        Self {
            api,
            session,
            config: ChatConfig::default(),
        }
    }

    /// Override chat settings (command queue depth)
    #[must_use]
    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the adapter with nothing selected
    ///
    /// Call [`AssistantChatHandle::refresh`] to load the conversation list.
    ///
    /// # Errors
    ///
    /// `SessionInvalid` when there is no authenticated session.
    pub fn mount(self) -> Result<AssistantChatHandle, ChatError> {
        let identity = self.session.current().ok_or(ChatError::SessionInvalid)?;

        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(AssistantView::default());

        let actor = AssistantActor {
            api: self.api,
            session: self.session,
            local_user: identity.user_id,
            display_name: identity.display_name,
            conversations: Vec::new(),
            current: None,
            loading: false,
            awaiting: 0,
            error: None,
            load_waiters: Vec::new(),
            outbox: Outbox::default(),
            view: view_tx,
            done: done_tx,
        };
        let task = tokio::spawn(actor.run(commands_rx, done_rx));

        Ok(AssistantChatHandle {
            commands: commands_tx,
            view: view_rx,
            task,
        })
    }
}

/// Handle to the assistant surface
pub struct AssistantChatHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<AssistantView>,
    task: JoinHandle<()>,
}

impl AssistantChatHandle {
    /// Current view
    #[must_use]
    pub fn view(&self) -> AssistantView {
        self.view.borrow().clone()
    }

    /// Subscribe to view changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AssistantView> {
        self.view.clone()
    }

    /// Reload the conversation list (selects the first one if nothing is
    /// selected)
    pub async fn refresh(&self) -> Result<Vec<Conversation>, ChatError> {
        request(&self.commands, |reply| Command::Refresh { reply }).await
    }

    /// Create a conversation, select it and ask the assistant to greet
    pub async fn create(&self) -> Result<Conversation, ChatError> {
        request(&self.commands, |reply| Command::Create { reply }).await
    }

    /// Select a conversation; resolves once its history is loaded
    pub async fn select(&self, id: ConversationId) -> Result<(), ChatError> {
        request(&self.commands, |reply| Command::Select { id, reply }).await
    }

    /// Delete a conversation (clears the selection if it was selected)
    pub async fn delete(&self, id: ConversationId) -> Result<(), ChatError> {
        request(&self.commands, |reply| Command::Delete { id, reply }).await
    }

    /// Rename a conversation
    pub async fn rename(
        &self,
        id: ConversationId,
        title: impl Into<String>,
    ) -> Result<Conversation, ChatError> {
        let title = title.into();
        request(&self.commands, |reply| Command::Rename { id, title, reply }).await
    }

    /// Send to the selected conversation
    ///
    /// `speaker` names who is talking (a family member using the shared
    /// device); it defaults to the logged-in identity's display name.
    /// Returns the optimistic entry; the batch shows up in the view.
    pub async fn send(
        &self,
        body: impl Into<String>,
        speaker: Option<String>,
    ) -> Result<Message, ChatError> {
        let body = body.into();
        request(&self.commands, |reply| Command::Send {
            body,
            speaker,
            reply,
        })
        .await
    }

    /// Re-submit a failed send
    pub async fn retry(&self, temp_id: TempId) -> Result<(), ChatError> {
        request(&self.commands, |reply| Command::Retry { temp_id, reply }).await
    }

    /// Stop the adapter and wait for it to exit
    pub async fn shutdown(self) {
        let _ = request(&self.commands, |reply| Command::Shutdown { reply }).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Assistant chat task failed");
        }
    }
}

struct Selection {
    conversation: Conversation,
    sync: ConversationSync,
}

struct AssistantActor {
    api: Arc<dyn AssistantApi>,
    session: SessionStore,
    local_user: UserId,
    display_name: String,
    conversations: Vec<Conversation>,
    current: Option<Selection>,
    loading: bool,
    awaiting: usize,
    error: Option<ChatError>,
    load_waiters: Vec<Reply<()>>,
    outbox: Outbox,
    view: watch::Sender<AssistantView>,
    done: mpsc::UnboundedSender<Completion>,
}

impl AssistantActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.settle_waiters(Err(ChatError::Stopped));
                        self.outbox.flush();
                        respond(reply, Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.settle_waiters(Err(ChatError::Stopped));
                        self.outbox.flush();
                        break;
                    }
                },

                Some(completion) = done.recv() => self.handle_completion(completion).await,
            }

            self.publish();
            self.outbox.flush();
        }
        tracing::debug!("Assistant chat stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh { reply } => {
                let api = Arc::clone(&self.api);
                self.spawn(async move {
                    let result = api.list_conversations().await;
                    Completion::Listed { result, reply }
                });
            }

            Command::Create { reply } => {
                let api = Arc::clone(&self.api);
                self.spawn(async move {
                    let result = api.create_conversation().await;
                    Completion::Created { result, reply }
                });
            }

            Command::Select { id, reply } => {
                match self.conversations.iter().find(|c| c.id == id).cloned() {
                    Some(conversation) => self.select(conversation, Some(reply)),
                    None => self.outbox.push(reply, Err(ChatError::NoConversation)),
                }
            }

            Command::Delete { id, reply } => {
                let api = Arc::clone(&self.api);
                self.spawn(async move {
                    let result = api.delete_conversation(&id).await;
                    Completion::Deleted { id, result, reply }
                });
            }

            Command::Rename { id, title, reply } => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    return self.outbox.push(reply, Err(ChatError::EmptyMessage));
                }
                let api = Arc::clone(&self.api);
                self.spawn(async move {
                    let result = api.rename_conversation(&id, &title).await;
                    Completion::Renamed { result, reply }
                });
            }

            Command::Send {
                body,
                speaker,
                reply,
            } => {
                let body = match normalize_body(&body) {
                    Ok(body) => body,
                    Err(e) => return self.outbox.push(reply, Err(e)),
                };
                let speaker = speaker.unwrap_or_else(|| self.display_name.clone());
                let Some(selection) = self.current.as_mut() else {
                    return self.outbox.push(reply, Err(ChatError::NoConversation));
                };
                let pending = selection.sync.send_local(body.clone(), Some(speaker.clone()));
                let conversation_id = selection.conversation.id.clone();
                self.ask(conversation_id, pending.temp_id().cloned(), body, Some(speaker));
                self.outbox.push(reply, Ok(pending));
            }

            Command::Retry { temp_id, reply } => {
                let retried = self.current.as_mut().and_then(|selection| {
                    selection
                        .sync
                        .begin_retry(&temp_id)
                        .map(|message| (selection.conversation.id.clone(), message))
                });
                match retried {
                    Some((conversation_id, message)) => {
                        tracing::debug!(%temp_id, "Retrying assistant send");
                        self.ask(
                            conversation_id,
                            Some(temp_id),
                            message.body,
                            message.display_name,
                        );
                        self.outbox.push(reply, Ok(()));
                    }
                    None => self.outbox.push(reply, Err(ChatError::UnknownMessage)),
                }
            }

            Command::Shutdown { .. } => {}
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Listed { result, reply } => match result {
                Ok(conversations) => {
                    self.conversations = conversations.clone();
                    self.error = None;
                    let selected_gone = self
                        .current
                        .as_ref()
                        .is_some_and(|s| !conversations.iter().any(|c| c.id == s.conversation.id));
                    if selected_gone {
                        self.clear_selection();
                    }
                    if self.current.is_none() {
                        if let Some(first) = conversations.first().cloned() {
                            self.select(first, None);
                        }
                    }
                    self.outbox.push(reply, Ok(conversations));
                }
                Err(e) => {
                    let error = classify(&self.session, e).await;
                    self.error = Some(error.clone());
                    self.outbox.push(reply, Err(error));
                }
            },

            Completion::Created { result, reply } => match result {
                Ok(conversation) => {
                    tracing::info!(conversation_id = %conversation.id, "Assistant conversation created");
                    self.error = None;
                    self.conversations.retain(|c| c.id != conversation.id);
                    self.conversations.insert(0, conversation.clone());
                    self.settle_waiters(Ok(()));
                    self.current = Some(Selection {
                        sync: ConversationSync::new(conversation.id.clone(), self.local_user.clone()),
                        conversation: conversation.clone(),
                    });
                    self.loading = false;
                    self.ask(
                        conversation.id.clone(),
                        None,
                        GREETING_TRIGGER.to_string(),
                        Some(self.display_name.clone()),
                    );
                    self.outbox.push(reply, Ok(conversation));
                }
                Err(e) => {
                    let error = classify(&self.session, e).await;
                    self.error = Some(error.clone());
                    self.outbox.push(reply, Err(error));
                }
            },

            Completion::Deleted { id, result, reply } => match result {
                Ok(()) => {
                    self.conversations.retain(|c| c.id != id);
                    if self.current.as_ref().is_some_and(|s| s.conversation.id == id) {
                        self.clear_selection();
                    }
                    self.error = None;
                    self.outbox.push(reply, Ok(()));
                }
                Err(e) => {
                    let error = classify(&self.session, e).await;
                    self.error = Some(error.clone());
                    self.outbox.push(reply, Err(error));
                }
            },

            Completion::Renamed { result, reply } => match result {
                Ok(conversation) => {
                    self.apply_title(&conversation.id, conversation.title.clone());
                    self.error = None;
                    self.outbox.push(reply, Ok(conversation));
                }
                Err(e) => {
                    let error = classify(&self.session, e).await;
                    self.error = Some(error.clone());
                    self.outbox.push(reply, Err(error));
                }
            },

            Completion::Snapshot { ticket, result } => {
                let Some(selection) = self.current.as_mut() else {
                    return;
                };
                if !selection.sync.is_current(&ticket) {
                    tracing::debug!(conversation_id = %ticket.conversation_id(), "Discarding superseded snapshot");
                    return;
                }
                self.loading = false;
                let outcome = match result {
                    Ok(messages) => {
                        selection.sync.apply_snapshot(&ticket, messages);
                        self.error = None;
                        Ok(())
                    }
                    Err(e) => {
                        let error = classify(&self.session, e).await;
                        self.error = Some(error.clone());
                        Err(error)
                    }
                };
                for waiter in self.load_waiters.drain(..) {
                    self.outbox.push(waiter, outcome.clone());
                }
            }

            Completion::Answered {
                conversation_id,
                temp_id,
                result,
            } => {
                self.awaiting = self.awaiting.saturating_sub(1);
                match result {
                    Ok(reply) => self.apply_reply(&conversation_id, temp_id, reply),
                    Err(e) => {
                        if let (Some(selection), Some(temp_id)) = (self.current.as_mut(), temp_id) {
                            if selection.conversation.id == conversation_id {
                                selection.sync.mark_failed(&temp_id);
                            }
                        }
                        self.error = Some(classify(&self.session, e).await);
                    }
                }
            }
        }
    }

    fn apply_reply(
        &mut self,
        conversation_id: &ConversationId,
        temp_id: Option<TempId>,
        reply: AssistantReply,
    ) {
        if reply.conversation.id == *conversation_id {
            self.apply_title(conversation_id, reply.conversation.title.clone());
        }
        self.error = None;

        let Some(selection) = self
            .current
            .as_mut()
            .filter(|s| s.conversation.id == *conversation_id)
        else {
            tracing::debug!(%conversation_id, "Reply for a conversation no longer selected");
            return;
        };

        match temp_id {
            Some(temp_id) => {
                let outcome = selection.sync.reconcile_batch(&temp_id, reply.new_messages);
                tracing::debug!(%conversation_id, ?outcome, "Reconciled assistant batch");
            }
            None => {
                for message in reply.new_messages {
                    selection.sync.apply_remote_create(message);
                }
            }
        }
    }

    /// Copy a server-side title into the list entry and the selection
    fn apply_title(&mut self, id: &ConversationId, title: Option<String>) {
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.id == *id) {
            entry.title.clone_from(&title);
        }
        if let Some(selection) = self.current.as_mut().filter(|s| s.conversation.id == *id) {
            selection.conversation.title = title;
        }
    }

    fn select(&mut self, conversation: Conversation, waiter: Option<Reply<()>>) {
        let mut sync = ConversationSync::new(conversation.id.clone(), self.local_user.clone());
        let ticket = sync.begin_reload();
        self.current = Some(Selection { conversation, sync });
        self.loading = true;
        if let Some(waiter) = waiter {
            self.load_waiters.push(waiter);
        }

        let api = Arc::clone(&self.api);
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = api.fetch_assistant_messages(ticket.conversation_id()).await;
            let _ = done.send(Completion::Snapshot { ticket, result });
        });
    }

    fn clear_selection(&mut self) {
        self.current = None;
        self.loading = false;
        self.settle_waiters(Err(ChatError::NoConversation));
    }

    fn ask(
        &mut self,
        conversation_id: ConversationId,
        temp_id: Option<TempId>,
        body: String,
        speaker: Option<String>,
    ) {
        self.awaiting += 1;
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api
                .send_assistant_message(&conversation_id, &body, speaker.as_deref())
                .await;
            Completion::Answered {
                conversation_id,
                temp_id,
                result,
            }
        });
    }

    /// Run one request in the background and feed its completion back
    fn spawn(&self, work: impl Future<Output = Completion> + Send + 'static) {
        let done = self.done.clone();
        tokio::spawn(async move {
            let _ = done.send(work.await);
        });
    }

    /// Answer everyone waiting for the selection to load
    fn settle_waiters(&mut self, outcome: Result<(), ChatError>) {
        for waiter in self.load_waiters.drain(..) {
            self.outbox.push(waiter, outcome.clone());
        }
    }

    fn publish(&self) {
        let current = match &self.current {
            Some(selection) => ConversationView::capture(
                &selection.sync,
                None,
                selection.conversation.title.clone(),
                self.loading,
                self.error.clone(),
            ),
            None => ConversationView {
                error: self.error.clone(),
                ..ConversationView::default()
            },
        };
        let next = AssistantView {
            conversations: self.conversations.clone(),
            current,
            awaiting_reply: self.awaiting > 0,
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}
