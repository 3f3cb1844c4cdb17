//! Push channel adapter.
//!
//! A [`PushCapability`] is whatever transport can deliver realtime payloads for a topic (an
//! SSE endpoint, an in-process hub, ...). [`ChannelAdapter`] wraps an optional capability and
//! hands out [`Subscription`]s with connected/disconnected callbacks and an idempotent
//! [`Subscription::close`]. A missing capability is a normal configuration: `open` returns a
//! no-op subscription that reports itself as disconnected.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dto::push::PushMessage;

/// In-process broadcast transport.
pub mod memory;
/// Server-sent events over HTTP.
#[cfg(feature = "http")]
pub mod sse;

pub use self::memory::BroadcastCapability;
#[cfg(feature = "http")]
pub use self::sse::SseCapability;

/// Lifecycle events and raw payloads produced by a push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport (re)established.
    Connected,
    /// Transport lost.
    Disconnected,
    /// One raw JSON envelope.
    Payload(String),
}

/// Transport able to subscribe to a topic.
pub trait PushCapability: Send + Sync {
    /// Start delivering events for `topic`. Dropping the stream unsubscribes.
    fn subscribe(&self, topic: &str) -> BoxStream<'static, ChannelEvent>;
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(PushMessage) + Send + Sync>;

struct Listeners {
    on_message: Option<MessageHandler>,
    on_connected: Vec<Callback>,
    on_disconnected: Vec<Callback>,
    /// Last lifecycle event seen from the transport, if any.
    observed: Option<bool>,
}

impl Listeners {
    fn new(on_message: Option<MessageHandler>, observed: Option<bool>) -> Self {
        Self {
            on_message,
            on_connected: Vec::new(),
            on_disconnected: Vec::new(),
            observed,
        }
    }

    fn detach(&mut self) {
        self.on_message = None;
        self.on_connected.clear();
        self.on_disconnected.clear();
    }
}

/// Entry point for opening push subscriptions.
#[derive(Clone, Default)]
pub struct ChannelAdapter {
    capability: Option<Arc<dyn PushCapability>>,
}

impl ChannelAdapter {
    /// Build an adapter around an optional capability.
    pub fn new(capability: Option<Arc<dyn PushCapability>>) -> Self {
        Self { capability }
    }

    /// Adapter without any push transport; every subscription is a no-op.
    pub fn unavailable() -> Self {
        Self { capability: None }
    }

    /// Whether a push transport was injected.
    pub fn is_available(&self) -> bool {
        self.capability.is_some()
    }

    /// Subscribe to `topic`, delivering decoded messages to `on_message`.
    ///
    /// Must be called from within a Tokio runtime when a capability is present.
    pub fn open<F>(&self, topic: &str, on_message: F) -> Subscription
    where
        F: Fn(PushMessage) + Send + Sync + 'static,
    {
        let Some(capability) = &self.capability else {
            info!(topic, "push capability unavailable; opening no-op subscription");
            return Subscription::noop(topic);
        };

        let listeners = Arc::new(Mutex::new(Listeners::new(Some(Arc::new(on_message)), None)));
        let stream = capability.subscribe(topic);
        let driver = tokio::spawn(drive(topic.to_string(), stream, listeners.clone()));
        debug!(topic, "push subscription opened");

        Subscription {
            topic: topic.to_string(),
            listeners,
            driver: Mutex::new(Some(driver)),
            closed: AtomicBool::new(false),
            available: true,
        }
    }
}

/// Forward transport events to the subscription listeners until the stream ends.
async fn drive(
    topic: String,
    mut stream: BoxStream<'static, ChannelEvent>,
    listeners: Arc<Mutex<Listeners>>,
) {
    while let Some(event) = stream.next().await {
        match event {
            ChannelEvent::Connected => notify(&listeners, true),
            ChannelEvent::Disconnected => notify(&listeners, false),
            ChannelEvent::Payload(raw) => match PushMessage::from_json_str(&raw) {
                Ok(Some(message)) => {
                    let handler = listeners.lock().on_message.clone();
                    if let Some(handler) = handler {
                        handler(message);
                    }
                }
                Ok(None) => debug!(%topic, "ignoring push payload of unknown type"),
                Err(err) => warn!(%topic, error = %err, "dropping malformed push payload"),
            },
        }
    }

    debug!(%topic, "push stream ended");
    notify(&listeners, false);
}

/// Record a lifecycle transition and fire the matching callbacks outside the lock.
fn notify(listeners: &Mutex<Listeners>, connected: bool) {
    let callbacks = {
        let mut guard = listeners.lock();
        if guard.observed == Some(connected) {
            return;
        }
        guard.observed = Some(connected);
        if connected {
            guard.on_connected.clone()
        } else {
            guard.on_disconnected.clone()
        }
    };

    for callback in callbacks {
        callback();
    }
}

/// Handle on an open push subscription.
///
/// Dropping the handle closes it.
pub struct Subscription {
    topic: String,
    listeners: Arc<Mutex<Listeners>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    available: bool,
}

impl Subscription {
    fn noop(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            listeners: Arc::new(Mutex::new(Listeners::new(None, Some(false)))),
            driver: Mutex::new(None),
            closed: AtomicBool::new(false),
            available: false,
        }
    }

    /// Topic this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// `false` for the no-op subscription handed out when no capability exists.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register a callback for (re)connections.
    ///
    /// Fires immediately when the transport is already known to be connected.
    pub fn on_connected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(true, Arc::new(callback));
    }

    /// Register a callback for disconnections.
    ///
    /// Fires immediately when the transport is already known to be down, which is always
    /// the case for a no-op subscription.
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(false, Arc::new(callback));
    }

    fn register(&self, connected: bool, callback: Callback) {
        if self.is_closed() {
            return;
        }

        let fire_now = {
            let mut guard = self.listeners.lock();
            if connected {
                guard.on_connected.push(callback.clone());
            } else {
                guard.on_disconnected.push(callback.clone());
            }
            guard.observed == Some(connected)
        };

        if fire_now {
            callback();
        }
    }

    /// Stop the transport and detach every callback. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.listeners.lock().detach();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        debug!(topic = %self.topic, "push subscription closed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    const HUD: &str = r#"{"type":"hud","missionId":"m-1","serverTimestamp":10,"fields":{"fuel":12}}"#;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn noop_subscription_reports_disconnect_immediately() {
        let adapter = ChannelAdapter::unavailable();
        let subscription = adapter.open("mission:m-1", |_| {});
        let (disconnects, on_disconnected) = counter();
        let (connects, on_connected) = counter();

        subscription.on_disconnected(on_disconnected);
        subscription.on_connected(on_connected);

        assert!(!subscription.is_available());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 0);

        subscription.close();
        subscription.close();
        assert!(subscription.is_closed());
    }

    #[tokio::test]
    async fn delivers_messages_and_lifecycle_events() {
        let hub = Arc::new(BroadcastCapability::new(16));
        let adapter = ChannelAdapter::new(Some(hub.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = adapter.open("mission:m-1", move |message| {
            let _ = tx.send(message);
        });
        let (disconnects, on_disconnected) = counter();
        subscription.on_disconnected(on_disconnected);

        hub.wait_for_subscribers("mission:m-1", 1).await;
        hub.publish("mission:m-1", HUD);
        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.mission_id(), "m-1");

        hub.disconnect("mission:m-1");
        tokio::time::timeout(Duration::from_secs(1), async {
            while disconnects.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn close_detaches_callbacks_and_unsubscribes() {
        let hub = Arc::new(BroadcastCapability::new(16));
        let adapter = ChannelAdapter::new(Some(hub.clone()));
        let (messages, on_message) = counter();
        let subscription = adapter.open("mission:m-1", move |_| on_message());
        let (connects, on_connected) = counter();
        subscription.on_connected(on_connected);
        hub.wait_for_subscribers("mission:m-1", 1).await;

        subscription.close();
        subscription.close();
        tokio::time::timeout(Duration::from_secs(1), hub.wait_for_subscribers("mission:m-1", 0))
            .await
            .unwrap();

        hub.publish("mission:m-1", HUD);
        hub.connect("mission:m-1");
        tokio::task::yield_now().await;
        assert_eq!(messages.load(Ordering::SeqCst), 0);
        assert!(connects.load(Ordering::SeqCst) <= 1);

        subscription.on_connected(|| panic!("closed subscriptions must not register callbacks"));
    }
}
