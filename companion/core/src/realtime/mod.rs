//! Realtime Layer
//!
//! The [`ConnectionManager`] owns the one transport connection of a session
//! and publishes decoded server events on an [`EventBus`]. It never touches
//! message state; synchronizers consume its events.

pub mod bus;
pub mod manager;

pub use bus::{EventBus, Subscription};
pub use manager::{ConnectionManager, ConnectionState, ConnectionStatus};
