//! Typed Event Bus
//!
//! Fan-out of decoded [`BusEvent`]s to any number of subscribers, each
//! filtering by [`EventKind`]. Subscribing returns a [`Subscription`] handle;
//! dropping the handle (or calling [`Subscription::unsubscribe`]) removes the
//! subscriber, so a subscriber's lifetime is exactly the handle's lifetime.
//!
//! Delivery is unbounded and in publish order per subscriber. A slow
//! subscriber never blocks the publisher or other subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::events::{BusEvent, EventKind};

struct Subscriber {
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<BusEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// Publish/subscribe hub for realtime events
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given kinds
    ///
    /// An empty slice subscribes to nothing; use [`EventKind::ALL`] for
    /// everything.
    #[must_use]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.insert(
            id,
            Subscriber {
                kinds: kinds.to_vec(),
                tx,
            },
        );
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every subscriber of its kind
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let kind = event.kind();
        let mut registry = self.registry.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, subscriber) in &registry.subscribers {
            if !subscriber.kinds.contains(&kind) {
                continue;
            }
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            registry.subscribers.remove(&id);
        }

        tracing::trace!(?kind, delivered, "Published bus event");
        delivered
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

/// Handle to one bus subscription
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<BusEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Wait for the next event (`None` once the bus is gone)
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().subscribers.remove(&self.id);
        }
    }
}
