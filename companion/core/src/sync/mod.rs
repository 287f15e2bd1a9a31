//! Conversation Synchronization
//!
//! [`ConversationSync`] reconciles snapshots, optimistic sends and remote
//! events into one ordered, duplicate-free sequence per conversation.
//! [`TypingIndicator`] debounces the local user's typing signal.

pub mod conversation;
pub mod typing;

pub use conversation::{BatchOutcome, ConfirmOutcome, ConversationSync, Ticket};
pub use typing::{TypingIndicator, TypingSignal, DEFAULT_TYPING_TIMEOUT};
