//! Family group chat adapter
//!
//! Mounting joins the conversation's room, loads the snapshot and starts
//! feeding realtime events into the synchronizer. Sends are optimistic and,
//! once the server confirms them, re-broadcast over the realtime connection:
//! the server persists over REST, but fan-out to the other participants is
//! the sender's job. Confirmed edits are re-broadcast the same way.
//!
//! Room joins are not replayed by the connection manager, so the adapter
//! re-joins its own room whenever it sees [`BusEvent::Connected`].

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    classify, normalize_body, request, respond, ChatError, ConversationView, Outbox, Reply,
};
use crate::api::{ApiResult, GroupChatApi};
use crate::config::ChatConfig;
use crate::events::{BusEvent, ClientEvent, EventKind, MembershipChange};
use crate::messages::{Conversation, ConversationId, Member, Message, MessageId, TempId};
use crate::realtime::{ConnectionManager, Subscription};
use crate::session::SessionStore;
use crate::sync::{ConfirmOutcome, ConversationSync, Ticket, TypingIndicator, TypingSignal};
use crate::wire::WireMessage;

/// What the presentation layer sees of the group conversation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupView {
    /// Messages, typing and load state
    pub conversation: ConversationView,
    /// Family members in the conversation
    pub participants: Vec<Member>,
    /// Realtime connection is up
    pub connected: bool,
}

enum Command {
    Send {
        body: String,
        reply: Reply<Message>,
    },
    Edit {
        id: MessageId,
        body: String,
        reply: Reply<Message>,
    },
    Retry {
        temp_id: TempId,
        reply: Reply<()>,
    },
    Keystroke,
    Reload {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

enum Completion {
    Snapshot {
        ticket: Ticket,
        result: ApiResult<Vec<Message>>,
    },
    Sent {
        temp_id: TempId,
        result: ApiResult<Message>,
    },
    Edited {
        ticket: Ticket,
        result: ApiResult<Message>,
        reply: Reply<Message>,
    },
}

/// Builder for a mounted group conversation
pub struct GroupChat {
    api: Arc<dyn GroupChatApi>,
    connection: ConnectionManager,
    session: SessionStore,
    config: ChatConfig,
}

impl GroupChat {
    /// Adapter over the given collaborators, with default chat settings
    pub fn new(
        api: Arc<dyn GroupChatApi>,
        connection: ConnectionManager,
        session: SessionStore,
    ) -> Self {
        Self {
            api,
            connection,
            session,
            config: ChatConfig::default(),
        }
    }

    /// Override chat settings (typing timeout, command queue depth)
    #[must_use]
    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Look up the family's group conversation, then mount it
    ///
    /// # Errors
    ///
    /// `SessionInvalid` without a session or when the credential is
    /// rejected, `Network` when the lookup fails.
    pub async fn open(self) -> Result<GroupChatHandle, ChatError> {
        if self.session.current().is_none() {
            return Err(ChatError::SessionInvalid);
        }
        let conversation = match self.api.group_conversation().await {
            Ok(conversation) => conversation,
            Err(e) => return Err(classify(&self.session, e).await),
        };
        self.mount(conversation).await
    }

    /// Mount a known conversation: join its room and start loading history
    ///
    /// Returns as soon as the actor runs; the view shows `loading` until the
    /// snapshot arrives.
    ///
    /// # Errors
    ///
    /// `SessionInvalid` when there is no authenticated session.
    pub async fn mount(self, conversation: Conversation) -> Result<GroupChatHandle, ChatError> {
        let identity = self.session.current().ok_or(ChatError::SessionInvalid)?;

        // Subscribe before joining so nothing published in between is missed
        let events = self.connection.subscribe(&EventKind::ALL);
        self.connection.join_room(&conversation.id).await;

        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(GroupView::default());

        let mut actor = GroupActor {
            sync: ConversationSync::new(conversation.id.clone(), identity.user_id.clone()),
            typing: TypingIndicator::new(self.config.typing_timeout),
            title: conversation.title,
            participants: conversation.participants,
            loading: false,
            error: None,
            reload_waiters: Vec::new(),
            outbox: Outbox::default(),
            api: self.api,
            connection: self.connection,
            session: self.session,
            view: view_tx,
            done: done_tx,
        };
        actor.start_reload(None);
        actor.publish();

        tracing::info!(conversation_id = %conversation.id, "Group conversation mounted");
        let task = tokio::spawn(actor.run(commands_rx, done_rx, events));

        Ok(GroupChatHandle {
            conversation_id: conversation.id,
            commands: commands_tx,
            view: view_rx,
            task,
        })
    }
}

/// Handle to a mounted group conversation
///
/// Dropping the handle unmounts the conversation; [`Self::shutdown`] does
/// the same and waits for the actor to finish.
pub struct GroupChatHandle {
    conversation_id: ConversationId,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<GroupView>,
    task: JoinHandle<()>,
}

impl GroupChatHandle {
    /// Conversation this handle drives
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Current view
    #[must_use]
    pub fn view(&self) -> GroupView {
        self.view.borrow().clone()
    }

    /// Subscribe to view changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<GroupView> {
        self.view.clone()
    }

    /// Send a message
    ///
    /// Returns the optimistic entry as soon as it is in the sequence; the
    /// confirmation (or failure) shows up in the view later.
    pub async fn send(&self, body: impl Into<String>) -> Result<Message, ChatError> {
        let body = body.into();
        request(&self.commands, |reply| Command::Send { body, reply }).await
    }

    /// Edit a message; resolves with the server's edited copy once it has
    /// replaced the old entry
    pub async fn edit(&self, id: MessageId, body: impl Into<String>) -> Result<Message, ChatError> {
        let body = body.into();
        request(&self.commands, |reply| Command::Edit { id, body, reply }).await
    }

    /// Re-submit a failed send from its original position
    pub async fn retry(&self, temp_id: TempId) -> Result<(), ChatError> {
        request(&self.commands, |reply| Command::Retry { temp_id, reply }).await
    }

    /// Report a local keystroke in the composer
    pub async fn keystroke(&self) -> Result<(), ChatError> {
        self.commands
            .send(Command::Keystroke)
            .await
            .map_err(|_| ChatError::Stopped)
    }

    /// Reload the history; resolves once the snapshot is applied
    pub async fn reload(&self) -> Result<(), ChatError> {
        request(&self.commands, |reply| Command::Reload { reply }).await
    }

    /// Unmount: announce `stop typing` if needed, release the subscription
    /// and wait for the actor to exit
    pub async fn shutdown(self) {
        let _ = request(&self.commands, |reply| Command::Shutdown { reply }).await;
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Group conversation task failed");
        }
    }
}

struct GroupActor {
    api: Arc<dyn GroupChatApi>,
    connection: ConnectionManager,
    session: SessionStore,
    sync: ConversationSync,
    typing: TypingIndicator,
    title: Option<String>,
    participants: Vec<Member>,
    loading: bool,
    error: Option<ChatError>,
    reload_waiters: Vec<Reply<()>>,
    outbox: Outbox,
    view: watch::Sender<GroupView>,
    done: mpsc::UnboundedSender<Completion>,
}

impl GroupActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
        mut events: Subscription,
    ) {
        loop {
            let deadline = self.typing.deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.unmount().await;
                        self.outbox.flush();
                        respond(reply, Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.unmount().await;
                        self.outbox.flush();
                        break;
                    }
                },

                Some(completion) = done.recv() => self.handle_completion(completion).await,

                Some(event) = events.recv() => self.handle_event(event).await,

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(signal) = self.typing.expire(Instant::now()) {
                        self.announce_typing(signal).await;
                    }
                }
            }

            self.publish();
            self.outbox.flush();
        }

        events.unsubscribe();
        tracing::info!(conversation_id = %self.sync.conversation_id(), "Group conversation unmounted");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { body, reply } => {
                let body = match normalize_body(&body) {
                    Ok(body) => body,
                    Err(e) => return self.outbox.push(reply, Err(e)),
                };
                if let Some(signal) = self.typing.stop() {
                    self.announce_typing(signal).await;
                }
                let pending = self.sync.send_local(body.clone(), None);
                if let Some(temp_id) = pending.temp_id().cloned() {
                    self.submit(temp_id, body);
                }
                self.outbox.push(reply, Ok(pending));
            }

            Command::Edit { id, body, reply } => {
                let body = match normalize_body(&body) {
                    Ok(body) => body,
                    Err(e) => return self.outbox.push(reply, Err(e)),
                };
                if self.sync.get(&id).is_none() {
                    return self.outbox.push(reply, Err(ChatError::UnknownMessage));
                }
                let ticket = self.sync.ticket();
                let api = Arc::clone(&self.api);
                let done = self.done.clone();
                tokio::spawn(async move {
                    let result = api
                        .edit_message(ticket.conversation_id(), &id, &body)
                        .await;
                    let _ = done.send(Completion::Edited {
                        ticket,
                        result,
                        reply,
                    });
                });
            }

            Command::Retry { temp_id, reply } => match self.sync.begin_retry(&temp_id) {
                Some(message) => {
                    tracing::debug!(%temp_id, "Retrying send");
                    self.submit(temp_id, message.body);
                    self.outbox.push(reply, Ok(()));
                }
                None => self.outbox.push(reply, Err(ChatError::UnknownMessage)),
            },

            Command::Keystroke => {
                if let Some(signal) = self.typing.keystroke(Instant::now()) {
                    self.announce_typing(signal).await;
                }
            }

            Command::Reload { reply } => self.start_reload(Some(reply)),

            Command::Shutdown { .. } => {}
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Snapshot { ticket, result } => {
                if !self.sync.is_current(&ticket) {
                    tracing::debug!(conversation_id = %ticket.conversation_id(), "Discarding superseded snapshot");
                    return;
                }
                self.loading = false;
                let outcome = match result {
                    Ok(messages) => {
                        self.sync.apply_snapshot(&ticket, messages);
                        self.error = None;
                        tracing::info!(
                            conversation_id = %self.sync.conversation_id(),
                            messages = self.sync.len(),
                            "Snapshot loaded"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        let error = classify(&self.session, e).await;
                        self.error = Some(error.clone());
                        Err(error)
                    }
                };
                for waiter in self.reload_waiters.drain(..) {
                    self.outbox.push(waiter, outcome.clone());
                }
            }

            Completion::Sent { temp_id, result } => match result {
                Ok(confirmed) => {
                    let outcome = self.sync.confirm_send(&temp_id, confirmed.clone());
                    if outcome != ConfirmOutcome::Rejected {
                        self.error = None;
                        self.fan_out(confirmed, ClientEvent::NewMessage).await;
                    }
                }
                Err(e) => {
                    self.sync.mark_failed(&temp_id);
                    self.error = Some(classify(&self.session, e).await);
                }
            },

            Completion::Edited {
                ticket,
                result,
                reply,
            } => match result {
                Ok(edited) => {
                    if self.sync.apply_local_edit(&ticket, edited.clone()) {
                        self.error = None;
                        self.fan_out(edited.clone(), ClientEvent::EditMessage).await;
                    }
                    self.outbox.push(reply, Ok(edited));
                }
                Err(e) => {
                    let error = classify(&self.session, e).await;
                    self.error = Some(error.clone());
                    self.outbox.push(reply, Err(error));
                }
            },
        }
    }

    async fn handle_event(&mut self, event: BusEvent) {
        let ours = event
            .conversation_id()
            .map_or(true, |id| id == self.sync.conversation_id());
        if !ours {
            return;
        }

        match event {
            BusEvent::Connected => {
                self.connection.join_room(self.sync.conversation_id()).await;
            }
            BusEvent::Disconnected { .. } => self.sync.set_remote_typing(false),
            BusEvent::MessageCreated(message) => {
                self.sync.apply_remote_create(message);
            }
            BusEvent::MessageEdited(message) => {
                self.sync.apply_remote_edit(message);
            }
            BusEvent::TypingStarted(_) => self.sync.set_remote_typing(true),
            BusEvent::TypingStopped(_) => self.sync.set_remote_typing(false),
            BusEvent::MembershipChanged(MembershipChange::Added(member)) => {
                if !self.participants.iter().any(|m| m.id == member.id) {
                    tracing::debug!(user_id = %member.id, "Member added");
                    self.participants.push(member);
                }
            }
            BusEvent::MembershipChanged(MembershipChange::Removed(id)) => {
                self.participants.retain(|m| m.id != id);
            }
        }
    }

    fn start_reload(&mut self, waiter: Option<Reply<()>>) {
        let ticket = self.sync.begin_reload();
        self.loading = true;
        if let Some(waiter) = waiter {
            self.reload_waiters.push(waiter);
        }

        let api = Arc::clone(&self.api);
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = api.fetch_messages(ticket.conversation_id()).await;
            let _ = done.send(Completion::Snapshot { ticket, result });
        });
    }

    fn submit(&self, temp_id: TempId, body: String) {
        let api = Arc::clone(&self.api);
        let done = self.done.clone();
        let conversation = self.sync.conversation_id().clone();
        tokio::spawn(async move {
            let result = api.send_message(&conversation, &body).await;
            let _ = done.send(Completion::Sent { temp_id, result });
        });
    }

    /// Re-broadcast a confirmed message to the other participants
    async fn fan_out(&self, message: Message, event: fn(WireMessage) -> ClientEvent) {
        let wire = match WireMessage::try_from(&message) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot re-broadcast message");
                return;
            }
        };
        if let Err(e) = self.connection.emit(event(wire)).await {
            tracing::warn!(message_id = %message.key(), error = %e, "Fan-out failed");
        }
    }

    async fn announce_typing(&self, signal: TypingSignal) {
        let event = signal.into_event(self.sync.conversation_id().clone());
        if let Err(e) = self.connection.emit(event).await {
            tracing::debug!(?signal, error = %e, "Typing signal not sent");
        }
    }

    async fn unmount(&mut self) {
        if let Some(signal) = self.typing.stop() {
            self.announce_typing(signal).await;
        }
        for waiter in self.reload_waiters.drain(..) {
            self.outbox.push(waiter, Err(ChatError::Stopped));
        }
    }

    fn publish(&self) {
        let next = GroupView {
            conversation: ConversationView::capture(
                &self.sync,
                Some(&self.typing),
                self.title.clone(),
                self.loading,
                self.error.clone(),
            ),
            participants: self.participants.clone(),
            connected: self.connection.is_connected(),
        };
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
