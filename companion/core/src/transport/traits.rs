//! Transport Traits
//!
//! The client side of the realtime connection. One implementation per
//! mechanism (WebSocket in production, in-process channels in tests); the
//! [`ConnectionManager`](crate::realtime::ConnectionManager) only sees this
//! trait.

use std::fmt;

use async_trait::async_trait;

use crate::events::{ClientEvent, ServerEvent};
use crate::session::Identity;

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to the server failed
    ConnectionFailed(String),
    /// Connection was closed
    ConnectionClosed,
    /// Failed to send an event
    SendFailed(String),
    /// Event serialization/deserialization error
    SerializationError(String),
    /// Transport not in expected state
    InvalidState(String),
    /// Frame exceeds the size limit
    FrameTooLarge {
        /// Frame size in bytes
        size: usize,
        /// Limit in bytes
        max: usize,
    },
}

impl TransportError {
    /// Whether the connection is unusable after this error
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::ConnectionClosed)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "Frame too large: {size} bytes (max: {max})")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Client side of a realtime connection
///
/// Implementations deliver inbound events in arrival order and never
/// surface a malformed frame as an event.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open the connection
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection
    ///
    /// Gracefully closes the connection; safe to call when closed.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Send an event to the server
    async fn send(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Receive the next server event (waits until one is available)
    ///
    /// Returns `ConnectionClosed` once the server side is gone.
    async fn recv(&mut self) -> Result<ServerEvent, TransportError>;

    /// Try to receive a server event without waiting
    fn try_recv(&mut self) -> Option<ServerEvent>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;
}

/// Creates an unconnected transport authenticated as an identity
pub trait TransportFactory: Send + Sync {
    /// Build a transport for `identity`
    fn create(&self, identity: &Identity) -> Result<Box<dyn RealtimeTransport>, TransportError>;
}
