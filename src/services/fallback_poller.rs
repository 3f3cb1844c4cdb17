use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{dao::snapshot::SnapshotSource, dto::snapshot::MissionSnapshot};

type Deliver = Arc<dyn Fn(MissionSnapshot) + Send + Sync>;

/// Periodic snapshot fetcher used while the push channel is down.
///
/// Activation fetches immediately and then on a fixed interval with no backoff. Each fetch
/// runs as its own task so deactivating only cancels the schedule: a fetch already in flight
/// still delivers its result.
pub struct FallbackPoller {
    source: Arc<dyn SnapshotSource>,
    mission_id: String,
    period: Duration,
    deliver: Deliver,
    schedule: Option<JoinHandle<()>>,
}

impl FallbackPoller {
    /// Build an inactive poller delivering every successful fetch to `deliver`.
    pub fn new<F>(
        source: Arc<dyn SnapshotSource>,
        mission_id: impl Into<String>,
        period: Duration,
        deliver: F,
    ) -> Self
    where
        F: Fn(MissionSnapshot) + Send + Sync + 'static,
    {
        Self {
            source,
            mission_id: mission_id.into(),
            period,
            deliver: Arc::new(deliver),
            schedule: None,
        }
    }

    /// Whether the poll schedule is running.
    pub fn is_active(&self) -> bool {
        self.schedule.is_some()
    }

    /// Start polling. No-op when already active.
    pub fn activate(&mut self) {
        if self.is_active() {
            return;
        }

        info!(
            mission_id = %self.mission_id,
            period_ms = self.period.as_millis() as u64,
            "activating fallback polling"
        );
        let source = self.source.clone();
        let mission_id = self.mission_id.clone();
        let deliver = self.deliver.clone();
        let period = self.period;

        self.schedule = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let fetch = source.fetch_snapshot(&mission_id);
                let mission_id = mission_id.clone();
                let deliver = deliver.clone();

                tokio::spawn(async move {
                    match fetch.await {
                        Ok(snapshot) => deliver(snapshot),
                        Err(err) => {
                            warn!(%mission_id, error = %err, "fallback poll failed")
                        }
                    }
                });
            }
        }));
    }

    /// Stop polling. No-op when already inactive.
    pub fn deactivate(&mut self) {
        if let Some(schedule) = self.schedule.take() {
            schedule.abort();
            debug!(mission_id = %self.mission_id, "fallback polling deactivated");
        }
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        self.deactivate();
    }
}
