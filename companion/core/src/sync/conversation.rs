//! Conversation Synchronizer
//!
//! Single source of truth for one conversation's ordered message sequence.
//! Three sources feed it:
//!
//! - snapshots fetched over REST (replace everything)
//! - optimistic local sends (appended as `Pending`, later confirmed in place)
//! - realtime or batched server events (create and edit)
//!
//! # Ordering
//!
//! A message's position is fixed when it is first inserted, optimistic or
//! not, and the sequence is never re-sorted by timestamp. Confirmation swaps
//! a pending entry for its server copy at the same index.
//!
//! # Totality
//!
//! Every mutation is defined for every state. Unknown ids, duplicates,
//! messages for another conversation and stale completions are absorbed and
//! reported through return values, never as errors.
//!
//! # Epochs
//!
//! Each snapshot load starts a new epoch. Completions that captured a
//! [`Ticket`] before the load (snapshot responses, local edits) are discarded
//! when they resolve under a later epoch. Epoch numbers are process-wide, so
//! a ticket can never match a different synchronizer either.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::messages::{Author, ConversationId, Delivery, Message, MessageId, TempId, UserId};

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

fn next_epoch() -> u64 {
    NEXT_EPOCH.fetch_add(1, Ordering::Relaxed)
}

/// Captures which conversation state an in-flight operation started from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    conversation_id: ConversationId,
    epoch: u64,
}

impl Ticket {
    /// Conversation the operation belongs to
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

/// What [`ConversationSync::confirm_send`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The pending entry was replaced in place
    Replaced,
    /// The server copy had already arrived as a remote create; the pending
    /// entry took its data and the later duplicate was removed
    Merged,
    /// The pending entry is gone (a snapshot replaced it) and the server copy
    /// is already present
    AlreadyPresent,
    /// The pending entry is gone and the server copy was appended
    Appended,
    /// Not applicable here (other conversation, or not a server message)
    Rejected,
}

/// What [`ConversationSync::reconcile_batch`] did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// How the echo of the local send was reconciled, if the batch had one
    pub echo: Option<ConfirmOutcome>,
    /// Other messages appended
    pub appended: usize,
    /// Other messages dropped as duplicates or foreign
    pub ignored: usize,
}

/// Per-conversation reconciliation state
#[derive(Clone, Debug)]
pub struct ConversationSync {
    conversation_id: ConversationId,
    local_user: UserId,
    epoch: u64,
    messages: Vec<Message>,
    remote_typing: bool,
}

impl ConversationSync {
    /// Empty synchronizer for a conversation, as seen by `local_user`
    #[must_use]
    pub fn new(conversation_id: ConversationId, local_user: UserId) -> Self {
        Self {
            conversation_id,
            local_user,
            epoch: next_epoch(),
            messages: Vec::new(),
            remote_typing: false,
        }
    }

    /// Conversation this synchronizer owns
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The reconciled sequence
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the sequence is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Entry with this server id
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position_of(id).map(|i| &self.messages[i])
    }

    /// Entry with this temporary id
    #[must_use]
    pub fn get_pending(&self, temp_id: &TempId) -> Option<&Message> {
        self.position_of_pending(temp_id).map(|i| &self.messages[i])
    }

    /// Ticket for an operation starting now
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        Ticket {
            conversation_id: self.conversation_id.clone(),
            epoch: self.epoch,
        }
    }

    /// Start a snapshot load: opens a new epoch and returns its ticket
    ///
    /// Tickets issued before this call become stale.
    pub fn begin_reload(&mut self) -> Ticket {
        self.epoch = next_epoch();
        self.ticket()
    }

    /// Whether an operation holding `ticket` may still apply its result
    #[must_use]
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.conversation_id == self.conversation_id && ticket.epoch == self.epoch
    }

    /// Replace the whole sequence with a fetched snapshot
    ///
    /// Pending entries are discarded. Entries for other conversations and
    /// repeated ids are dropped. Returns `false` (and changes nothing) when
    /// the ticket is stale.
    pub fn apply_snapshot(&mut self, ticket: &Ticket, snapshot: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!(conversation_id = %self.conversation_id, "Discarding stale snapshot");
            return false;
        }

        let mut seen = HashSet::new();
        let discarded_pending = self.messages.iter().filter(|m| m.is_pending()).count();
        self.messages = snapshot
            .into_iter()
            .filter(|m| m.conversation_id == self.conversation_id)
            .filter(|m| m.server_id().is_some_and(|id| seen.insert(id.clone())))
            .collect();

        tracing::debug!(
            conversation_id = %self.conversation_id,
            messages = self.messages.len(),
            discarded_pending,
            "Applied snapshot"
        );
        true
    }

    /// Append an optimistic message from the local user
    ///
    /// Returns the provisional entry (its temporary id keys later calls).
    pub fn send_local(&mut self, body: impl Into<String>, display_name: Option<String>) -> Message {
        let message = Message::pending(
            self.conversation_id.clone(),
            self.local_user.clone(),
            body,
            display_name,
        );
        self.messages.push(message.clone());
        message
    }

    /// Reconcile the server copy of a local send with its pending entry
    pub fn confirm_send(&mut self, temp_id: &TempId, confirmed: Message) -> ConfirmOutcome {
        if confirmed.conversation_id != self.conversation_id {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                other = %confirmed.conversation_id,
                "Ignoring confirmation for another conversation"
            );
            return ConfirmOutcome::Rejected;
        }
        let Some(id) = confirmed.server_id().cloned() else {
            return ConfirmOutcome::Rejected;
        };

        let outcome = match (self.position_of_pending(temp_id), self.position_of(&id)) {
            (Some(pending), None) => {
                self.messages[pending] = confirmed;
                ConfirmOutcome::Replaced
            }
            (Some(pending), Some(existing)) => {
                self.messages[pending] = confirmed;
                self.messages.remove(existing);
                ConfirmOutcome::Merged
            }
            (None, Some(_)) => ConfirmOutcome::AlreadyPresent,
            (None, None) => {
                self.messages.push(confirmed);
                ConfirmOutcome::Appended
            }
        };

        tracing::debug!(
            conversation_id = %self.conversation_id,
            %temp_id,
            message_id = %id,
            ?outcome,
            "Confirmed send"
        );
        outcome
    }

    /// Apply a message created elsewhere
    ///
    /// Appends unless a message with the same server id is already present.
    /// Returns whether the sequence changed.
    pub fn apply_remote_create(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        let Some(id) = message.server_id() else {
            return false;
        };
        if self.position_of(id).is_some() {
            tracing::debug!(conversation_id = %self.conversation_id, message_id = %id, "Deduplicated message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Apply an edit made elsewhere
    ///
    /// Rewrites the entry's body in place and marks it edited; its position,
    /// creation time and delivery state are kept. The payload's display name
    /// replaces the entry's when present. An unknown id is a no-op (the edit
    /// is dropped, not queued). Returns whether an entry was found.
    pub fn apply_remote_edit(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }
        let Some(id) = message.server_id() else {
            return false;
        };
        let Some(position) = self.position_of(id) else {
            tracing::debug!(conversation_id = %self.conversation_id, message_id = %id, "Dropping edit for unknown message");
            return false;
        };

        let entry = &mut self.messages[position];
        entry.body = message.body;
        entry.edited = true;
        if message.display_name.is_some() {
            entry.display_name = message.display_name;
        }
        true
    }

    /// Apply the server's answer to a local edit started under `ticket`
    ///
    /// Same in-place semantics as [`Self::apply_remote_edit`]; a stale ticket
    /// discards the result.
    pub fn apply_local_edit(&mut self, ticket: &Ticket, message: Message) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!(conversation_id = %self.conversation_id, "Discarding stale edit result");
            return false;
        }
        self.apply_remote_edit(message)
    }

    /// Flag a pending entry as failed (kept for retry)
    pub fn mark_failed(&mut self, temp_id: &TempId) -> bool {
        self.set_failed(temp_id, true)
    }

    /// Clear the failed flag of a pending entry so it can be re-submitted
    ///
    /// Returns the entry to re-send, or `None` if it is not a failed pending
    /// entry of this conversation.
    pub fn begin_retry(&mut self, temp_id: &TempId) -> Option<Message> {
        let position = self.position_of_pending(temp_id)?;
        if !self.messages[position].is_failed() {
            return None;
        }
        self.set_failed(temp_id, false);
        Some(self.messages[position].clone())
    }

    /// Reconcile the batch of messages a request/response send produced
    ///
    /// The first message in the batch written by the local user is the echo
    /// of the pending send and confirms it in place; the rest are applied with
    /// create semantics, in batch order. Without an echo the pending entry
    /// stays as it is.
    pub fn reconcile_batch(&mut self, temp_id: &TempId, batch: Vec<Message>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let echo_index = batch.iter().position(|m| {
            m.author.is_user(&self.local_user) && m.conversation_id == self.conversation_id
        });

        for (index, message) in batch.into_iter().enumerate() {
            if Some(index) == echo_index {
                outcome.echo = Some(self.confirm_send(temp_id, message));
            } else if self.apply_remote_create(message) {
                outcome.appended += 1;
            } else {
                outcome.ignored += 1;
            }
        }
        outcome
    }

    /// Record a remote typing signal
    pub fn set_remote_typing(&mut self, typing: bool) {
        self.remote_typing = typing;
    }

    /// Whether someone else is typing here
    #[must_use]
    pub fn remote_typing(&self) -> bool {
        self.remote_typing
    }

    /// Whether `message` was written by the local user
    #[must_use]
    pub fn is_own(&self, message: &Message) -> bool {
        matches!(&message.author, Author::User(id) if *id == self.local_user)
    }

    fn set_failed(&mut self, temp_id: &TempId, value: bool) -> bool {
        let Some(position) = self.position_of_pending(temp_id) else {
            return false;
        };
        if let Delivery::Pending { failed, .. } = &mut self.messages[position].delivery {
            *failed = value;
        }
        true
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.server_id() == Some(id))
    }

    fn position_of_pending(&self, temp_id: &TempId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.temp_id() == Some(temp_id))
    }
}
