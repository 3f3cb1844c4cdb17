use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::dto::snapshot::MissionSnapshot;

use super::{FetchError, FetchResult, SnapshotSource};

enum Reply {
    Snapshot(MissionSnapshot),
    Status(u16),
    Unavailable,
}

/// Snapshot source serving a scripted reply, for embedding and tests.
///
/// Clones share the same script and call counter.
#[derive(Clone)]
pub struct InMemorySnapshotSource {
    reply: Arc<Mutex<Reply>>,
    latency: Arc<Mutex<Option<Duration>>>,
    calls: Arc<AtomicUsize>,
}

impl Default for InMemorySnapshotSource {
    fn default() -> Self {
        Self {
            reply: Arc::new(Mutex::new(Reply::Unavailable)),
            latency: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InMemorySnapshotSource {
    /// Source that fails every fetch until a snapshot is set.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Source that always returns `snapshot`.
    pub fn serving(snapshot: MissionSnapshot) -> Self {
        let source = Self::default();
        source.set_snapshot(snapshot);
        source
    }

    /// Serve `snapshot` from now on.
    pub fn set_snapshot(&self, snapshot: MissionSnapshot) {
        *self.reply.lock() = Reply::Snapshot(snapshot);
    }

    /// Answer every fetch with a non-success status.
    pub fn fail_with_status(&self, status: u16) {
        *self.reply.lock() = Reply::Status(status);
    }

    /// Delay every reply, simulating a slow network.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for InMemorySnapshotSource {
    fn fetch_snapshot(&self, mission_id: &str) -> BoxFuture<'static, FetchResult<MissionSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        let reply = self.reply.clone();
        let mission_id = mission_id.to_string();

        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            match &*reply.lock() {
                Reply::Snapshot(snapshot) => Ok(snapshot.clone()),
                Reply::Status(status) => Err(FetchError::RequestStatus {
                    mission_id,
                    status: *status,
                }),
                Reply::Unavailable => Err(FetchError::Unavailable { mission_id }),
            }
        })
    }
}
