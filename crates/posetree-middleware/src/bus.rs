//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Merges`] | Committed optimizer rounds: the epoch boundary consumers re-read poses at |
//! | [`Topic::Structure`] | Graph admissions, node removals, subtree invalidations |

use posetree_types::{Event, EventPayload, PoseTreeError};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A batch of optimizer results was committed.
    Merges,
    /// The shape or graph membership of the forest changed.
    Structure,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    merges: broadcast::Sender<Event>,
    structure: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (merges, _) = broadcast::channel(capacity);
        let (structure, _) = broadcast::channel(capacity);
        Self { merges, structure }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event,
    /// or [`PoseTreeError::Channel`] when nobody is listening on the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, PoseTreeError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| PoseTreeError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Wrap `payload` in a fresh [`Event`] and publish it.
    pub fn emit(
        &self,
        topic: Topic,
        source: &str,
        payload: EventPayload,
    ) -> Result<usize, PoseTreeError> {
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Merges => &self.merges,
            Topic::Structure => &self.structure,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-bound receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.
    ///
    /// Missing a merge notification is harmless for a consumer that only
    /// needs the latest epoch, so lag is logged and ignored.  Returns `None`
    /// once the bus is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "TopicReceiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posetree_types::{Epoch, FrameId, NodeId};
    use uuid::Uuid;

    fn merge_event(epoch: u64) -> Event {
        Event::new(
            "posetree-middleware::test",
            EventPayload::RoundCommitted {
                round: Uuid::new_v4(),
                epoch: Epoch(epoch),
                nodes: vec![NodeId(1)],
            },
        )
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Merges);

        let event = merge_event(1);
        assert_eq!(bus.publish_to(Topic::Merges, event.clone())?, 1);

        let received = rx.recv().await?;
        assert_eq!(received.id, event.id);
        assert_eq!(rx.topic(), Topic::Merges);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe_to(Topic::Merges);
        let mut rx2 = bus.subscribe_to(Topic::Merges);
        assert_eq!(bus.subscriber_count(Topic::Merges), 2);

        let event = merge_event(3);
        bus.publish_to(Topic::Merges, event.clone())?;

        assert_eq!(rx1.recv().await?.id, event.id);
        assert_eq!(rx2.recv().await?.id, event.id);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_channel_error() {
        let bus = EventBus::default();
        let err = bus.publish_to(Topic::Merges, merge_event(1)).unwrap_err();
        assert!(matches!(err, PoseTreeError::Channel(_)));
    }

    /// A `Structure` subscriber must not see `Merges` traffic.
    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut structure = bus.subscribe_to(Topic::Structure);
        let _merges = bus.subscribe_to(Topic::Merges);

        bus.publish_to(Topic::Merges, merge_event(1))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), structure.recv()).await;
        assert!(result.is_err(), "Structure subscriber must not receive a merge event");

        bus.emit(
            Topic::Structure,
            "posetree-middleware::test",
            EventPayload::NodeRemoved {
                node: NodeId(4),
                frame: FrameId(4),
            },
        )?;
        let event = structure.recv().await?;
        assert!(matches!(event.payload, EventPayload::NodeRemoved { .. }));
        Ok(())
    }

    /// Flooding a small channel while a subscriber sleeps yields `Lagged`
    /// from `recv`, and `next` skips past it to the newest events.
    #[tokio::test]
    async fn slow_subscriber_lags_then_catches_up() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Merges);
        let mut skipping = bus.subscribe_to(Topic::Merges);

        for epoch in 0..100 {
            let _ = bus.publish_to(Topic::Merges, merge_event(epoch));
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );

        let event = skipping.next().await.expect("bus still open");
        match event.payload {
            EventPayload::RoundCommitted { epoch, .. } => assert_eq!(epoch, Epoch(84)),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_returns_none_when_bus_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Structure);
        drop(bus);
        assert!(rx.next().await.is_none());
    }
}
