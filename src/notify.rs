use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for realtime slot updates, keyed by experience id so a
/// storefront can watch every slot of one experience with one subscription.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to slot events for an experience. Creates the channel if needed.
    pub fn subscribe(&self, experience_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(experience_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, experience_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&experience_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop an experience's channel once its last slot is deleted.
    /// Subscribers observe the close after draining pending events.
    pub fn remove(&self, experience_id: &Ulid) {
        self.channels.remove(experience_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let experience_id = Ulid::new();
        let mut rx = hub.subscribe(experience_id);

        let event = Event::AvailabilityDecremented {
            id: Ulid::new(),
            quantity: 1,
            remaining: 4,
            at: 1_000,
        };
        hub.send(experience_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let experience_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            experience_id,
            &Event::SlotDeleted { id: Ulid::new(), at: 0 },
        );
    }

    #[tokio::test]
    async fn experiences_are_isolated() {
        let hub = NotifyHub::new();
        let watched = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(watched);

        hub.send(other, &Event::SlotUnblocked { id: Ulid::new(), at: 0 });
        assert!(rx.try_recv().is_err());

        hub.send(watched, &Event::SlotUnblocked { id: Ulid::new(), at: 0 });
        assert!(rx.try_recv().is_ok());
    }
}
