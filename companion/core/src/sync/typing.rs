//! Local Typing Indicator
//!
//! `idle → typing → idle` machine for the local user. The first keystroke
//! while idle emits `Started` and arms an inactivity deadline; further
//! keystrokes only push the deadline back; reaching the deadline emits
//! `Stopped`.
//!
//! The machine holds no timer of its own. The owner sleeps until
//! [`TypingIndicator::deadline`] and then calls [`TypingIndicator::expire`],
//! which keeps the logic deterministic under a paused tokio clock.

use std::time::Duration;

use tokio::time::Instant;

use crate::events::ClientEvent;
use crate::messages::ConversationId;

/// Default inactivity timeout
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

/// Transition worth telling the other participants about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSignal {
    /// Went from idle to typing
    Started,
    /// Went from typing to idle
    Stopped,
}

impl TypingSignal {
    /// Realtime event announcing this signal in `conversation`
    #[must_use]
    pub fn into_event(self, conversation: ConversationId) -> ClientEvent {
        match self {
            Self::Started => ClientEvent::Typing(conversation),
            Self::Stopped => ClientEvent::StopTyping(conversation),
        }
    }
}

/// Debounced typing state of the local user
#[derive(Clone, Debug)]
pub struct TypingIndicator {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

impl TypingIndicator {
    /// Idle indicator with the given inactivity timeout
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Register a keystroke at `now`
    ///
    /// Returns `Started` only on the idle → typing transition.
    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_idle = self.deadline.is_none();
        self.deadline = Some(now + self.timeout);
        was_idle.then_some(TypingSignal::Started)
    }

    /// Check the deadline at `now`
    ///
    /// Returns `Stopped` if typing and the deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(TypingSignal::Stopped)
            }
            _ => None,
        }
    }

    /// Return to idle immediately (the message was sent)
    ///
    /// Returns `Stopped` if the indicator was typing.
    pub fn stop(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| TypingSignal::Stopped)
    }

    /// When typing expires, if typing
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the local user is typing
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// Configured inactivity timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
