//! Broadcast channel shared by a runtime and all of its component managers.
//!
//! ```text
//!   ComponentManager ─┐
//!   ComponentManager ─┼─ publish ─► Bus ─► runtime listener ─► SubscriberSet
//!   SubscriberSet    ─┘                 └► Runtime::subscribe() receivers
//! ```
//!
//! Publishing never waits. Every receiver shares one ring buffer of
//! `RuntimeConfig::bus_capacity` events; a receiver that falls behind sees
//! `RecvError::Lagged(n)` and resumes at the oldest retained event. Events
//! published while nobody listens are gone.

use tokio::sync::broadcast;

use super::event::Event;

/// Lifecycle event channel. Clones publish into the same ring buffer.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Capacity below 1 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // No receivers is not an error for lifecycle notifications.
        let _ = self.tx.send(event);
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(4);
        bus.publish(Event::new(EventKind::ComponentEnabled));
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ComponentDisabled));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ComponentDisabled);
    }

    #[tokio::test]
    async fn slow_receiver_skips_oldest_events() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ComponentEnabled));
        bus.publish(Event::new(EventKind::ComponentDisabled));
        bus.publish(Event::new(EventKind::ComponentEnabled));
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ComponentDisabled);
    }
}
