/// Realtime link status.
pub mod connection;
/// HUD readout and timestamp-guarded merges.
pub mod hud;
/// Tentative HUD edits awaiting server confirmation.
pub mod optimistic;
/// Drift-corrected countdowns.
pub mod timer;

pub use self::connection::ConnectionState;
pub use self::hud::{HudFields, HudMessage, HudReconciler, HudState};
pub use self::optimistic::{OptimisticHud, OptimisticPlan, PlanError, PlanId, ResolveError};
pub use self::timer::{
    TickOutcome, TimerDisplayState, TimerEngine, TimerKind, TimerMessage, TimerRejection,
    TimerStatus, TimerUpdate,
};
