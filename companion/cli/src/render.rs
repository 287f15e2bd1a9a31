//! Plain-text rendering of adapter views
//!
//! One line per message. Pending and failed sends are marked so the user can
//! tell which temporary id to pass to `/retry`.

use std::fmt::Write;

use companion_core::{
    AssistantView, Author, Conversation, ConversationView, GroupView, Member, Message,
};

/// Render one message line
///
/// Group messages resolve the author through the participant list; assistant
/// messages prefer the speaker name the message carries.
pub fn message_line(message: &Message, members: &[Member]) -> String {
    let who = match (&message.display_name, &message.author) {
        (Some(name), Author::User(_)) => name.clone(),
        (_, Author::Assistant) => "assistant".to_string(),
        (None, Author::User(id)) => members
            .iter()
            .find(|m| &m.id == id)
            .map_or_else(|| id.to_string(), |m| m.display_name.clone()),
    };

    let marker = if message.is_failed() {
        " [failed]"
    } else if message.is_pending() {
        " [sending]"
    } else if message.edited {
        " [edited]"
    } else {
        ""
    };

    format!("{:>10} {who}: {}{marker}", message.key(), message.body)
}

fn conversation_block(out: &mut String, view: &ConversationView, members: &[Member]) {
    if let Some(ref title) = view.title {
        let _ = writeln!(out, "== {title} ==");
    }
    if view.loading {
        out.push_str("(loading history)\n");
    }
    for message in &view.messages {
        out.push_str(&message_line(message, members));
        out.push('\n');
    }
    if view.remote_typing {
        out.push_str("(someone is typing)\n");
    }
    if let Some(ref error) = view.error {
        let _ = writeln!(out, "! {error}");
    }
}

/// Render the group surface
pub fn group(view: &GroupView) -> String {
    let mut out = String::new();
    let names: Vec<&str> = view
        .participants
        .iter()
        .map(|m| m.display_name.as_str())
        .collect();
    let _ = writeln!(
        out,
        "family ({}) [{}]",
        names.join(", "),
        if view.connected { "online" } else { "offline" }
    );
    conversation_block(&mut out, &view.conversation, &view.participants);
    out
}

/// Render the conversation list, marking the selected one
pub fn conversation_list(conversations: &[Conversation], current: Option<&str>) -> String {
    let mut out = String::new();
    for conversation in conversations {
        let mark = if Some(conversation.id.0.as_str()) == current {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{mark} {} {}",
            conversation.id,
            conversation.title.as_deref().unwrap_or("(untitled)")
        );
    }
    out
}

/// Render the assistant surface
pub fn assistant(view: &AssistantView) -> String {
    let current = view.current.conversation_id.as_ref().map(|id| id.0.as_str());
    let mut out = conversation_list(&view.conversations, current);
    if current.is_none() {
        out.push_str("(no conversation selected)\n");
        return out;
    }
    conversation_block(&mut out, &view.current, &[]);
    if view.awaiting_reply {
        out.push_str("(assistant is thinking)\n");
    }
    out
}
