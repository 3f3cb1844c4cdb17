use tokio::sync::watch;
use tracing::info;

/// Process-local view of push channel health.
///
/// Starts optimistic (connected) and only flips once a disconnect is observed. Changes are
/// broadcast through a [`watch`] channel so callers can render a "disconnected" indicator.
#[derive(Debug)]
pub struct ConnectionState {
    connected: watch::Sender<bool>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Create a connection state that assumes the channel is up.
    pub fn new() -> Self {
        let (connected, _rx) = watch::channel(true);
        Self { connected }
    }

    /// Current flag.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Subscribe to connection updates.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Record a connected/disconnected event, returning whether the flag changed.
    pub fn update(&self, value: bool) -> bool {
        let changed = self.connected.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });

        if changed {
            info!(connected = value, "push channel connection changed");
        }
        changed
    }
}
