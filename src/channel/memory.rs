use std::time::Duration;

use dashmap::DashMap;
use futures::{
    future,
    stream::{self, BoxStream, StreamExt},
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;

use crate::channel::{ChannelEvent, PushCapability};

/// In-process push transport backed by one Tokio broadcast channel per topic.
///
/// Useful when the producer lives in the same process (embedded servers, simulations) and in
/// tests, where `connect`/`disconnect` let the caller script transport failures.
pub struct BroadcastCapability {
    capacity: usize,
    topics: DashMap<String, broadcast::Sender<ChannelEvent>>,
}

impl BroadcastCapability {
    /// Create a hub whose per-topic channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: DashMap::new(),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<ChannelEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn send(&self, topic: &str, event: ChannelEvent) -> usize {
        self.sender(topic).send(event).unwrap_or(0)
    }

    /// Publish a raw payload, returning how many subscribers received it.
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> usize {
        self.send(topic, ChannelEvent::Payload(payload.into()))
    }

    /// Serialise `payload` to JSON and publish it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> serde_json::Result<usize> {
        let raw = serde_json::to_string(payload)?;
        Ok(self.publish(topic, raw))
    }

    /// Signal subscribers that the transport came back.
    pub fn connect(&self, topic: &str) -> usize {
        self.send(topic, ChannelEvent::Connected)
    }

    /// Signal subscribers that the transport dropped.
    pub fn disconnect(&self, topic: &str) -> usize {
        self.send(topic, ChannelEvent::Disconnected)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Wait until exactly `count` subscriptions are live on `topic`.
    pub async fn wait_for_subscribers(&self, topic: &str, count: usize) {
        while self.subscriber_count(topic) != count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

impl PushCapability for BroadcastCapability {
    fn subscribe(&self, topic: &str) -> BoxStream<'static, ChannelEvent> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let events = BroadcastStream::new(receiver).filter_map(move |event| {
            let event = match event {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    // Skip lagged events but keep the subscription alive.
                    warn!(%topic, skipped, "push subscriber lagged");
                    None
                }
            };
            future::ready(event)
        });

        stream::once(future::ready(ChannelEvent::Connected))
            .chain(events)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_connected_then_events() {
        let hub = BroadcastCapability::new(4);
        let mut stream = hub.subscribe("mission:a");
        assert_eq!(hub.subscriber_count("mission:a"), 1);
        assert_eq!(hub.subscriber_count("mission:b"), 0);

        hub.publish("mission:a", "{}");
        hub.disconnect("mission:a");

        assert_eq!(stream.next().await, Some(ChannelEvent::Connected));
        assert_eq!(stream.next().await, Some(ChannelEvent::Payload("{}".into())));
        assert_eq!(stream.next().await, Some(ChannelEvent::Disconnected));

        drop(stream);
        assert_eq!(hub.subscriber_count("mission:a"), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let hub = BroadcastCapability::new(2);
        let mut stream = hub.subscribe("mission:a");
        for n in 0..5 {
            hub.publish("mission:a", n.to_string());
        }

        assert_eq!(stream.next().await, Some(ChannelEvent::Connected));
        assert_eq!(stream.next().await, Some(ChannelEvent::Payload("3".into())));
        assert_eq!(stream.next().await, Some(ChannelEvent::Payload("4".into())));
    }
}
