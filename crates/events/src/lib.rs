use models::{Address, BlockIndex, FeedId};
use serde::{Deserialize, Serialize};

/// Domain events published by the mutation paths and consumed by the
/// cache invalidators. Delivery is in-process, asynchronous and
/// at-most-once: a subscriber that needs durable catch-up repopulates
/// from the database on its next cache miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum Event {
    IdentityUpdated {
        address: Address,
        display_name: String,
        block_index: BlockIndex,
    },
    UserJoinedGroup {
        feed_id: FeedId,
        address: Address,
        at_block: BlockIndex,
    },
    UserLeftGroup {
        feed_id: FeedId,
        address: Address,
        at_block: BlockIndex,
    },
    UserBannedFromGroup {
        feed_id: FeedId,
        address: Address,
        at_block: BlockIndex,
    },
    GroupTitleChanged {
        feed_id: FeedId,
        title: String,
    },
}

/// Default depth of the broadcast channel. Subscribers falling more
/// than this far behind drop events (with a warning) rather than
/// exerting backpressure on publishers.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process publish/subscribe bus over a tokio broadcast channel.
#[derive(Clone)]
pub struct Bus {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes to all current subscribers. Returns the number of
    /// subscribers the event was delivered to; zero subscribers is not
    /// an error (the bus may outlive its consumers during shutdown).
    pub fn publish(&self, event: Event) -> usize {
        tracing::debug!(?event, "publishing event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct Subscription {
    rx: tokio::sync::broadcast::Receiver<Event>,
}

impl Subscription {
    /// Next event, or `None` once the bus is closed. A lagged
    /// subscriber logs a warning and continues with the oldest
    /// retained event.
    pub async fn recv(&mut self) -> Option<Event> {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rename(address: &str, name: &str) -> Event {
        Event::IdentityUpdated {
            address: Address::from(address),
            display_name: name.to_string(),
            block_index: 1,
        }
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = Bus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(rename("alice", "Alice")), 2);
        assert_eq!(a.recv().await, Some(rename("alice", "Alice")));
        assert_eq!(b.recv().await, Some(rename("alice", "Alice")));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = Bus::default();
        assert_eq!(bus.publish(rename("alice", "Alice")), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_to_oldest_retained() {
        let bus = Bus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..4 {
            bus.publish(rename("alice", &format!("Alice{i}")));
        }
        // The first two events were dropped; delivery resumes.
        assert_eq!(sub.recv().await, Some(rename("alice", "Alice2")));
        assert_eq!(sub.recv().await, Some(rename("alice", "Alice3")));
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = Bus::default();
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }
}
