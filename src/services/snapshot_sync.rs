use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{dao::snapshot::SnapshotSource, dto::snapshot::MissionSnapshot};

/// One-shot fetch of the authoritative mission snapshot.
///
/// Used at mount and again after the push channel reconnects. A failed fetch yields `None`
/// and leaves every piece of state untouched; retrying is the caller's decision.
#[derive(Clone)]
pub struct SnapshotSync {
    source: Arc<dyn SnapshotSource>,
    mission_id: String,
}

impl SnapshotSync {
    /// Prepare a sync for `mission_id` against `source`.
    pub fn new(source: Arc<dyn SnapshotSource>, mission_id: impl Into<String>) -> Self {
        Self {
            source,
            mission_id: mission_id.into(),
        }
    }

    /// Fetch the snapshot once.
    pub async fn run(&self) -> Option<MissionSnapshot> {
        match self.source.fetch_snapshot(&self.mission_id).await {
            Ok(snapshot) => {
                info!(mission_id = %self.mission_id, "mission snapshot synced");
                Some(snapshot)
            }
            Err(err) => {
                warn!(
                    mission_id = %self.mission_id,
                    error = %err,
                    "mission snapshot sync failed; keeping current state"
                );
                None
            }
        }
    }

    /// Run the fetch in the background and hand a successful result to `deliver`.
    pub fn spawn<F>(&self, deliver: F) -> JoinHandle<()>
    where
        F: FnOnce(MissionSnapshot) + Send + 'static,
    {
        let sync = self.clone();
        tokio::spawn(async move {
            if let Some(snapshot) = sync.run().await {
                deliver(snapshot);
            }
        })
    }
}
