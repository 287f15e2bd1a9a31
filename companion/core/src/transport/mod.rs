//! Realtime Transport Layer
//!
//! Abstraction over the bidirectional event channel to the chat server:
//! - `InProcess`: direct channel communication (tests, embedded servers)
//! - `WebSocket`: the production transport (feature `websocket`)
//!
//! # Design Philosophy
//!
//! The transport moves typed events and nothing else. It knows neither
//! rooms nor conversations; connection lifecycle and event fan-out belong to
//! the [`ConnectionManager`](crate::realtime::ConnectionManager).

pub mod frame;
pub mod in_process;
pub mod traits;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use frame::{decode, encode, MAX_FRAME_SIZE};
pub use in_process::{InProcessFactory, InProcessPeer, InProcessTransport};
pub use traits::{RealtimeTransport, TransportError, TransportFactory};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketClient, WebSocketFactory};
