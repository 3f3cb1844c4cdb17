//! Mission session: the event loop that owns HUD and timer state for one mission.
//!
//! Push messages, poll results, connection changes, ticks and optimistic updates all funnel
//! into a single task and are applied in arrival order. No state is shared with other tasks;
//! callers observe it through a [`MissionSink`].

use std::{future::Future, sync::Arc};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelAdapter, Subscription},
    clock::{SharedClock, SystemClock},
    config::SyncConfig,
    dao::snapshot::SnapshotSource,
    dto::{
        push::{PushMessage, Toast},
        snapshot::MissionSnapshot,
    },
    error::SessionError,
    services::{fallback_poller::FallbackPoller, snapshot_sync::SnapshotSync},
    state::{
        ConnectionState, HudFields, HudMessage, HudReconciler, HudState, OptimisticHud, PlanId,
        TickOutcome, TimerDisplayState, TimerEngine, TimerKind, TimerMessage,
    },
};

/// Readout of every tracked timer, keyed by kind.
pub type TimersView = IndexMap<TimerKind, TimerDisplayState>;

/// Receives state produced by a mission session. The session never renders anything itself.
pub trait MissionSink: Send + Sync {
    /// HUD readout changed.
    fn on_hud_update(&self, hud: &HudState);
    /// At least one timer readout changed.
    fn on_timers_update(&self, timers: &TimersView);
    /// A toast notification arrived on the push channel.
    fn on_toast(&self, _toast: &Toast) {}
    /// The push channel went up or down.
    fn on_connection_change(&self, _connected: bool) {}
}

type Reply = oneshot::Sender<Result<HudState, SessionError>>;

enum SessionEvent {
    Push(PushMessage),
    Connection(bool),
    Snapshot(MissionSnapshot),
    Propose {
        delta: HudFields,
        confirm: BoxFuture<'static, Result<HudFields, String>>,
        reply: Reply,
    },
    Resolve {
        plan_id: PlanId,
        outcome: Result<HudFields, String>,
        reply: Reply,
    },
    Unmount,
}

/// Everything needed to mount a mission session.
pub struct MissionSession {
    mission_id: String,
    config: SyncConfig,
    clock: SharedClock,
    channel: ChannelAdapter,
    source: Arc<dyn SnapshotSource>,
    initial_hud: HudState,
    initial_timers: TimersView,
}

impl MissionSession {
    /// Prepare a session for `mission_id` with default configuration and the system clock.
    pub fn new(
        mission_id: impl Into<String>,
        source: Arc<dyn SnapshotSource>,
        channel: ChannelAdapter,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            config: SyncConfig::default(),
            clock: Arc::new(SystemClock),
            channel,
            source,
            initial_hud: HudState::default(),
            initial_timers: TimersView::new(),
        }
    }

    /// Override intervals, fallback deadline and tracked timer kinds.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Read wall-clock time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// HUD readout shown before anything arrives from the server.
    pub fn with_initial_hud(mut self, hud: HudState) -> Self {
        self.initial_hud = hud;
        self
    }

    /// Timer readout shown for `kind` before anything arrives from the server.
    pub fn with_initial_timer(mut self, kind: TimerKind, display: TimerDisplayState) -> Self {
        self.initial_timers.insert(kind, display);
        self
    }

    /// Push channel topic for a mission.
    pub fn topic_for(mission_id: &str) -> String {
        format!("mission:{mission_id}")
    }

    /// Start the session loop. Must be called from within a Tokio runtime.
    pub fn mount(self, sink: Arc<dyn MissionSink>) -> MissionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = ConnectionState::new();
        let connection_rx = connection.subscribe();

        let timers = self
            .config
            .timer_kinds
            .iter()
            .map(|kind| {
                let initial = self.initial_timers.get(kind).copied().unwrap_or_default();
                (
                    *kind,
                    TimerEngine::with_initial(*kind, self.clock.clone(), initial),
                )
            })
            .collect::<IndexMap<_, _>>();

        let poll_tx = events_tx.clone();
        let poller = FallbackPoller::new(
            self.source.clone(),
            self.mission_id.clone(),
            self.config.poll_interval,
            move |snapshot| {
                let _ = poll_tx.send(SessionEvent::Snapshot(snapshot));
            },
        );

        let state = SessionState {
            sync: SnapshotSync::new(self.source.clone(), self.mission_id.clone()),
            mission_id: self.mission_id,
            config: self.config,
            clock: self.clock,
            reconciler: HudReconciler::new(),
            hud: OptimisticHud::new(self.initial_hud),
            timers,
            connection,
            fallback_seeded: false,
            poller,
            sink,
            events: events_tx.clone(),
            subscription: None,
        };

        let task = tokio::spawn(run(state, self.channel, events_rx));

        MissionHandle {
            events: events_tx,
            connection: connection_rx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle on a mounted session. Dropping it unmounts the session in the background.
pub struct MissionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    connection: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MissionHandle {
    /// Subscribe to push channel health.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connection.clone()
    }

    /// Whether the push channel is currently considered up.
    pub fn is_connected(&self) -> bool {
        *self.connection.borrow()
    }

    /// Whether [`unmount`](Self::unmount) has already been called.
    pub fn is_mounted(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Show `tentative` immediately, then commit the fields returned by `confirm` or revert
    /// when it fails. Returns the readout after resolution.
    pub async fn optimistic_update<F, E>(
        &self,
        tentative: HudFields,
        confirm: F,
    ) -> Result<HudState, SessionError>
    where
        F: Future<Output = Result<HudFields, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let (reply, response) = oneshot::channel();
        let confirm = Box::pin(async move { confirm.await.map_err(|err| err.to_string()) });

        self.events
            .send(SessionEvent::Propose {
                delta: tentative,
                confirm,
                reply,
            })
            .map_err(|_| SessionError::Unmounted)?;

        response.await.map_err(|_| SessionError::Unmounted)?
    }

    /// Close the push subscription, stop ticking and stop polling. Safe to call repeatedly.
    pub async fn unmount(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };

        let _ = self.events.send(SessionEvent::Unmount);
        if let Err(err) = task.await {
            warn!(error = %err, "mission session task ended abnormally");
        }
    }
}

impl Drop for MissionHandle {
    fn drop(&mut self) {
        if self.task.get_mut().take().is_some() {
            let _ = self.events.send(SessionEvent::Unmount);
        }
    }
}

struct SessionState {
    mission_id: String,
    config: SyncConfig,
    clock: SharedClock,
    reconciler: HudReconciler,
    hud: OptimisticHud,
    timers: IndexMap<TimerKind, TimerEngine>,
    connection: ConnectionState,
    fallback_seeded: bool,
    poller: FallbackPoller,
    sync: SnapshotSync,
    sink: Arc<dyn MissionSink>,
    events: mpsc::UnboundedSender<SessionEvent>,
    subscription: Option<Subscription>,
}

async fn run(
    mut state: SessionState,
    channel: ChannelAdapter,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    info!(mission_id = %state.mission_id, "mounting mission session");
    state.publish_hud();
    state.publish_timers();

    let snapshot_tx = state.events.clone();
    state.sync.spawn(move |snapshot| {
        let _ = snapshot_tx.send(SessionEvent::Snapshot(snapshot));
    });
    state.open_channel(&channel);

    let mut ticker: Option<Interval> = None;
    loop {
        sync_ticker(&mut ticker, &state);

        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Unmount) | None => break,
                Some(event) => state.handle(event),
            },
            _ = next_tick(&mut ticker) => state.on_tick(),
        }
    }

    state.teardown();
}

/// Keep the tick interval armed exactly while some timer is running.
fn sync_ticker(ticker: &mut Option<Interval>, state: &SessionState) {
    let running = state.timers.values().any(TimerEngine::is_ticking);
    match (running, ticker.is_some()) {
        (true, false) => {
            let period = state.config.tick_interval;
            let mut fresh = interval_at(Instant::now() + period, period);
            fresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *ticker = Some(fresh);
        }
        (false, true) => *ticker = None,
        _ => {}
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SessionState {
    fn open_channel(&mut self, channel: &ChannelAdapter) {
        let topic = MissionSession::topic_for(&self.mission_id);

        let push_tx = self.events.clone();
        let subscription = channel.open(&topic, move |message| {
            let _ = push_tx.send(SessionEvent::Push(message));
        });

        let up_tx = self.events.clone();
        subscription.on_connected(move || {
            let _ = up_tx.send(SessionEvent::Connection(true));
        });
        let down_tx = self.events.clone();
        subscription.on_disconnected(move || {
            let _ = down_tx.send(SessionEvent::Connection(false));
        });

        self.subscription = Some(subscription);
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Push(message) => self.on_push(message),
            SessionEvent::Connection(connected) => self.on_connection(connected),
            SessionEvent::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            SessionEvent::Propose {
                delta,
                confirm,
                reply,
            } => self.propose(delta, confirm, reply),
            SessionEvent::Resolve {
                plan_id,
                outcome,
                reply,
            } => self.resolve(plan_id, outcome, reply),
            SessionEvent::Unmount => {}
        }
    }

    fn on_push(&mut self, message: PushMessage) {
        if message.mission_id() != self.mission_id {
            debug!(
                mission_id = %self.mission_id,
                other = message.mission_id(),
                "ignoring push message for another mission"
            );
            return;
        }

        match message {
            PushMessage::Hud(message) => self.apply_hud(&message),
            PushMessage::Timer(message) => {
                if self.apply_timer(&message) {
                    self.publish_timers();
                }
            }
            PushMessage::Toast(toast) => self.sink.on_toast(&toast),
        }
    }

    fn on_connection(&mut self, connected: bool) {
        if !self.connection.update(connected) {
            return;
        }
        self.sink.on_connection_change(connected);

        if connected {
            self.poller.deactivate();
            // Catch up on anything pushed while we were offline.
            let snapshot_tx = self.events.clone();
            self.sync.spawn(move |snapshot| {
                let _ = snapshot_tx.send(SessionEvent::Snapshot(snapshot));
            });
        } else {
            self.seed_fallback_deadline();
            self.poller.activate();
        }
    }

    /// Seed timers that never heard from the server with the configured fallback deadline.
    fn seed_fallback_deadline(&mut self) {
        if self.fallback_seeded {
            return;
        }
        self.fallback_seeded = true;

        let deadline = self.config.fallback_deadline;
        let mut seeded = false;
        for engine in self.timers.values_mut() {
            if engine.has_received_update() {
                continue;
            }
            let readout = engine.seed_fallback(deadline);
            debug!(kind = %engine.kind(), ?readout, "seeded timer from fallback deadline");
            seeded = true;
        }

        if seeded {
            self.publish_timers();
        }
    }

    fn apply_snapshot(&mut self, snapshot: MissionSnapshot) {
        if snapshot.mission_id != self.mission_id {
            warn!(
                mission_id = %self.mission_id,
                other = %snapshot.mission_id,
                "ignoring snapshot for another mission"
            );
            return;
        }

        let received_at = self.clock.now_ms();
        let hud = snapshot.hud_message(received_at);
        if snapshot.ordering_timestamp().is_some() {
            self.apply_hud(&hud);
        } else {
            let next = self.reconciler.apply_unordered(self.hud.confirmed(), &hud);
            self.confirm_hud(next);
        }

        let mut timers_changed = false;
        for message in snapshot.timer_messages(received_at) {
            timers_changed |= self.apply_timer(&message);
        }
        if timers_changed {
            self.publish_timers();
        }
    }

    fn apply_hud(&mut self, message: &HudMessage) {
        if let Some(next) = self.reconciler.try_merge(self.hud.confirmed(), message) {
            self.confirm_hud(next);
        }
    }

    fn confirm_hud(&mut self, next: HudState) {
        let before = self.hud.view();
        self.hud.set_confirmed(next);
        if self.hud.view() != before {
            self.publish_hud();
        }
    }

    fn apply_timer(&mut self, message: &TimerMessage) -> bool {
        let Some(engine) = self.timers.get_mut(&message.timer.kind) else {
            debug!(kind = %message.timer.kind, "ignoring timer kind not tracked by this session");
            return false;
        };

        match engine.apply(message) {
            Ok(_) => true,
            Err(rejection) => {
                debug!(error = %rejection, "ignoring timer message");
                false
            }
        }
    }

    fn on_tick(&mut self) {
        let mut changed = false;
        for engine in self.timers.values_mut() {
            match engine.tick() {
                TickOutcome::Idle => {}
                TickOutcome::Running => changed = true,
                TickOutcome::Expired => {
                    info!(kind = %engine.kind(), "timer expired");
                    changed = true;
                }
            }
        }

        if changed {
            self.publish_timers();
        }
    }

    fn propose(
        &mut self,
        delta: HudFields,
        confirm: BoxFuture<'static, Result<HudFields, String>>,
        reply: Reply,
    ) {
        let plan = match self.hud.plan(delta) {
            Ok(plan) => plan,
            Err(err) => {
                let _ = reply.send(Err(err.into()));
                return;
            }
        };
        self.publish_hud();

        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = confirm.await;
            let _ = events.send(SessionEvent::Resolve {
                plan_id: plan.id,
                outcome,
                reply,
            });
        });
    }

    fn resolve(&mut self, plan_id: PlanId, outcome: Result<HudFields, String>, reply: Reply) {
        let result = match outcome {
            Ok(confirmed) => self.hud.commit(plan_id, &confirmed).map_err(SessionError::from),
            Err(reason) => {
                warn!(mission_id = %self.mission_id, %reason, "optimistic update rejected; reverting");
                match self.hud.revert(plan_id) {
                    Ok(_) => Err(SessionError::Rejected(reason)),
                    Err(err) => Err(err.into()),
                }
            }
        };

        self.publish_hud();
        let _ = reply.send(result);
    }

    fn publish_hud(&self) {
        self.sink.on_hud_update(&self.hud.view());
    }

    fn publish_timers(&self) {
        let view = self
            .timers
            .iter()
            .map(|(kind, engine)| (*kind, engine.display()))
            .collect::<TimersView>();
        self.sink.on_timers_update(&view);
    }

    fn teardown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        self.poller.deactivate();
        info!(mission_id = %self.mission_id, "mission session unmounted");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        channel::BroadcastCapability,
        clock::{EpochMs, ManualClock},
        dao::snapshot::InMemorySnapshotSource,
        dto::{push::ToastLevel, snapshot::SnapshotTimer},
        state::TimerStatus,
    };

    const NOW: EpochMs = 1_700_000_000_000;
    const MISSION: &str = "m-1";
    const TOPIC: &str = "mission:m-1";

    #[derive(Default)]
    struct RecordingSink {
        huds: Mutex<Vec<HudState>>,
        timers: Mutex<Vec<TimersView>>,
        toasts: Mutex<Vec<Toast>>,
        connection: Mutex<Vec<bool>>,
    }

    impl RecordingSink {
        fn last_hud(&self) -> HudState {
            self.huds.lock().last().cloned().unwrap()
        }

        fn last_timer(&self, kind: TimerKind) -> TimerDisplayState {
            self.timers.lock().last().unwrap()[&kind]
        }
    }

    impl MissionSink for RecordingSink {
        fn on_hud_update(&self, hud: &HudState) {
            self.huds.lock().push(hud.clone());
        }

        fn on_timers_update(&self, timers: &TimersView) {
            self.timers.lock().push(timers.clone());
        }

        fn on_toast(&self, toast: &Toast) {
            self.toasts.lock().push(toast.clone());
        }

        fn on_connection_change(&self, connected: bool) {
            self.connection.lock().push(connected);
        }
    }

    struct Harness {
        clock: ManualClock,
        source: InMemorySnapshotSource,
        hub: Arc<BroadcastCapability>,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                clock: ManualClock::new(NOW),
                source: InMemorySnapshotSource::unavailable(),
                hub: Arc::new(BroadcastCapability::new(32)),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn mount(&self, channel: ChannelAdapter, config: SyncConfig) -> MissionHandle {
            MissionSession::new(MISSION, Arc::new(self.source.clone()), channel)
                .with_config(config)
                .with_clock(Arc::new(self.clock.clone()))
                .mount(self.sink.clone())
        }

        async fn mount_with_push(&self) -> MissionHandle {
            let handle = self.mount(
                ChannelAdapter::new(Some(self.hub.clone())),
                SyncConfig::default(),
            );
            self.hub.wait_for_subscribers(TOPIC, 1).await;
            settle().await;
            handle
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn hud_snapshot(timestamp: EpochMs, fuel: f64) -> MissionSnapshot {
        MissionSnapshot {
            mission_id: MISSION.into(),
            server_timestamp: Some(timestamp),
            server_now: None,
            hud: HudFields {
                fuel: Some(fuel),
                ..Default::default()
            },
            timers: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_push_capability_counts_down_to_fallback_deadline() {
        let harness = Harness::new();
        let config = SyncConfig {
            fallback_deadline: Some(NOW + 60_000),
            ..SyncConfig::default()
        };
        let handle = harness.mount(ChannelAdapter::unavailable(), config);
        settle().await;

        assert!(!handle.is_connected());
        assert_eq!(*harness.sink.connection.lock(), vec![false]);
        let launch = harness.sink.last_timer(TimerKind::Launch);
        assert_eq!(launch.status, TimerStatus::Running);
        assert_eq!(launch.remaining_ms, 60_000);

        harness.clock.advance(1_000);
        sleep(Duration::from_millis(100)).await;
        let launch = harness.sink.last_timer(TimerKind::Launch);
        assert_eq!(launch.status, TimerStatus::Running);
        assert_eq!(launch.remaining_ms, 59_000);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_push_capability_without_deadline_ends_immediately() {
        let harness = Harness::new();
        let handle = harness.mount(ChannelAdapter::unavailable(), SyncConfig::default());
        settle().await;

        for kind in TimerKind::ALL {
            let display = harness.sink.last_timer(kind);
            assert_eq!(display.status, TimerStatus::Ended);
            assert_eq!(display.remaining_ms, 0);
        }

        // Mount sync plus the immediate fallback poll, then one poll per interval.
        assert_eq!(harness.source.calls(), 2);
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(harness.source.calls(), 3);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn push_messages_merge_and_stale_ones_are_dropped() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;
        let published_before = harness.sink.huds.lock().len();

        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "hud", "missionId": MISSION, "serverTimestamp": 10, "fields": {"fuel": 50}}),
        )
        .unwrap();
        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "hud", "missionId": MISSION, "serverTimestamp": 5, "fields": {"fuel": 10}}),
        )
        .unwrap();
        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "hud", "missionId": "m-2", "serverTimestamp": 99, "fields": {"fuel": 1}}),
        )
        .unwrap();
        settle().await;

        assert_eq!(harness.sink.huds.lock().len(), published_before + 1);
        assert_eq!(harness.sink.last_hud().fuel, 50.0);
        assert!(handle.is_connected());

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_polls_until_reconnect_then_resyncs() {
        let harness = Harness::new();
        harness.source.set_snapshot(hud_snapshot(100, 77.0));
        let handle = harness.mount_with_push().await;
        assert_eq!(harness.source.calls(), 1);
        assert_eq!(harness.sink.last_hud().fuel, 77.0);

        harness.hub.disconnect(TOPIC);
        settle().await;
        assert!(!handle.is_connected());
        assert_eq!(harness.source.calls(), 2);

        harness.source.set_snapshot(hud_snapshot(200, 60.0));
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(harness.source.calls(), 3);
        assert_eq!(harness.sink.last_hud().fuel, 60.0);

        harness.hub.connect(TOPIC);
        settle().await;
        assert!(handle.is_connected());
        assert_eq!(harness.source.calls(), 4);

        sleep(Duration::from_millis(20_000)).await;
        assert_eq!(harness.source.calls(), 4);
        assert_eq!(*harness.sink.connection.lock(), vec![false, true]);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_timers_drive_engines_on_mount_and_poll() {
        let harness = Harness::new();
        let mut mounted = hud_snapshot(100, 70.0);
        mounted.server_now = Some(json!(NOW + 1_000));
        mounted.timers.insert(
            TimerKind::Launch,
            SnapshotTimer {
                ends_at: Some(json!(NOW + 46_000)),
                server_now: None,
                status: TimerStatus::Running,
            },
        );
        harness.source.set_snapshot(mounted);
        let handle = harness.mount_with_push().await;

        let launch = harness.sink.last_timer(TimerKind::Launch);
        assert_eq!(launch.status, TimerStatus::Running);
        assert_eq!(launch.remaining_ms, 45_000);

        harness.hub.disconnect(TOPIC);
        settle().await;
        assert_eq!(harness.sink.last_timer(TimerKind::Ballot).status, TimerStatus::Ended);
        assert_eq!(harness.sink.last_timer(TimerKind::Launch).remaining_ms, 45_000);

        let mut polled = hud_snapshot(200, 70.0);
        polled.timers.insert(
            TimerKind::Ballot,
            SnapshotTimer {
                ends_at: Some(json!(NOW + 20_000)),
                server_now: Some(json!(NOW)),
                status: TimerStatus::Paused,
            },
        );
        harness.source.set_snapshot(polled);
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(harness.source.calls(), 3);

        let ballot = harness.sink.last_timer(TimerKind::Ballot);
        assert_eq!(ballot.status, TimerStatus::Paused);
        assert_eq!(ballot.remaining_ms, 20_000);
        assert_eq!(ballot.ends_at, Some(NOW + 20_000));
        assert_eq!(harness.sink.last_timer(TimerKind::Launch).status, TimerStatus::Running);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polled_snapshot_older_than_push_is_dropped() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;

        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "hud", "missionId": MISSION, "serverTimestamp": 500, "fields": {"fuel": 40, "hull": 80}}),
        )
        .unwrap();
        settle().await;
        assert_eq!(harness.sink.last_hud().fuel, 40.0);

        harness.source.set_snapshot(hud_snapshot(300, 99.0));
        harness.hub.disconnect(TOPIC);
        settle().await;
        assert_eq!(harness.source.calls(), 2);
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(harness.source.calls(), 3);

        let hud = harness.sink.last_hud();
        assert_eq!(hud.fuel, 40.0);
        assert_eq!(hud.hull, 80.0);

        harness.source.set_snapshot(hud_snapshot(600, 55.0));
        sleep(Duration::from_millis(5_000)).await;
        let hud = harness.sink.last_hud();
        assert_eq!(hud.fuel, 55.0);
        assert_eq!(hud.hull, 0.0);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_without_server_time_does_not_block_pushes() {
        let harness = Harness::new();
        let mut untimed = hud_snapshot(0, 80.0);
        untimed.server_timestamp = None;
        harness.source.set_snapshot(untimed);
        let handle = harness.mount_with_push().await;
        assert_eq!(harness.sink.last_hud().fuel, 80.0);

        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "hud", "missionId": MISSION, "serverTimestamp": 5, "fields": {"fuel": 20}}),
        )
        .unwrap();
        settle().await;
        assert_eq!(harness.sink.last_hud().fuel, 20.0);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_push_is_corrected_for_server_drift_and_expires() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;

        let server_now = NOW + 2_000;
        harness.hub.publish_json(
            TOPIC,
            &json!({
                "type": "timer",
                "missionId": MISSION,
                "serverTimestamp": server_now,
                "timer": {"kind": "BALLOT", "endsAt": server_now + 30_000, "serverNow": server_now, "status": "running"}
            }),
        )
        .unwrap();
        settle().await;
        assert_eq!(harness.sink.last_timer(TimerKind::Ballot).remaining_ms, 30_000);

        harness.clock.advance(1_000);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.sink.last_timer(TimerKind::Ballot).remaining_ms, 29_000);

        harness.clock.advance(30_000);
        sleep(Duration::from_millis(100)).await;
        let ballot = harness.sink.last_timer(TimerKind::Ballot);
        assert_eq!(ballot.status, TimerStatus::Ended);
        assert_eq!(ballot.remaining_ms, 0);

        let published = harness.sink.timers.lock().len();
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(harness.sink.timers.lock().len(), published);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_update_commits_server_fields() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;

        let state = handle
            .optimistic_update(
                HudFields {
                    fuel: Some(30.0),
                    ..Default::default()
                },
                async {
                    sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(HudFields {
                        fuel: Some(32.0),
                        ..Default::default()
                    })
                },
            )
            .await
            .unwrap();

        assert_eq!(state.fuel, 32.0);
        let fuels = harness
            .sink
            .huds
            .lock()
            .iter()
            .map(|hud| hud.fuel)
            .collect::<Vec<_>>();
        assert_eq!(fuels, vec![0.0, 30.0, 32.0]);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_optimistic_update_reverts() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;

        let err = handle
            .optimistic_update(
                HudFields {
                    crew: Some(9.0),
                    ..Default::default()
                },
                async { Err::<HudFields, _>("denied") },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Rejected(reason) if reason == "denied"));
        assert_eq!(harness.sink.last_hud(), HudState::default());

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn toasts_are_forwarded() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;

        harness.hub.publish_json(
            TOPIC,
            &json!({"type": "toast", "missionId": MISSION, "message": "Ballot open", "level": "warning"}),
        )
        .unwrap();
        settle().await;

        let toasts = harness.sink.toasts.lock();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].message, "Ballot open");
        assert_eq!(toasts[0].level, ToastLevel::Warning);
        drop(toasts);

        handle.unmount().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_is_idempotent_and_releases_everything() {
        let harness = Harness::new();
        let handle = harness.mount_with_push().await;
        assert_eq!(harness.hub.subscriber_count(TOPIC), 1);

        handle.unmount().await;
        handle.unmount().await;
        settle().await;

        assert!(!handle.is_mounted());
        assert_eq!(harness.hub.subscriber_count(TOPIC), 0);
        assert!(matches!(
            handle
                .optimistic_update(HudFields::default(), async { Ok::<_, String>(HudFields::default()) })
                .await,
            Err(SessionError::Unmounted)
        ));

        let calls = harness.source.calls();
        sleep(Duration::from_millis(20_000)).await;
        assert_eq!(harness.source.calls(), calls);
    }
}
