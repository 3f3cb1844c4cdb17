use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::clock::{EpochMs, SharedClock};

/// Which countdown a timer message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimerKind {
    /// Countdown to launch.
    #[serde(alias = "launch")]
    Launch,
    /// Voting window for the crew ballot.
    #[serde(alias = "ballot")]
    Ballot,
    /// Duration of the current mission phase.
    #[serde(alias = "phase")]
    Phase,
}

impl TimerKind {
    /// Every kind, in display order.
    pub const ALL: [TimerKind; 3] = [TimerKind::Launch, TimerKind::Ballot, TimerKind::Phase];
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TimerKind::Launch => "LAUNCH",
            TimerKind::Ballot => "BALLOT",
            TimerKind::Phase => "PHASE",
        };
        f.write_str(label)
    }
}

/// Server-declared (or locally clamped) state of a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    /// Counting down.
    Running,
    /// Frozen at its current remaining time.
    Paused,
    /// Finished; remaining time is zero or frozen.
    Ended,
}

/// Timer sub-object of a [`TimerMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimerUpdate {
    /// Countdown the update targets.
    pub kind: TimerKind,
    /// Absolute deadline. `None` when the payload omitted it or it could not be parsed.
    pub ends_at: Option<EpochMs>,
    /// Server wall clock at the moment the message was produced.
    pub server_now: Option<EpochMs>,
    /// Declared status.
    pub status: TimerStatus,
}

/// Timer update delivered either by the push channel or by a polled snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerMessage {
    /// Mission the update belongs to.
    pub mission_id: String,
    /// Server epoch milliseconds at which the update was emitted.
    pub server_timestamp: EpochMs,
    /// The timer payload itself.
    pub timer: TimerUpdate,
}

/// Derived countdown readout handed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerDisplayState {
    /// Effective status after the expiry clamp.
    pub status: TimerStatus,
    /// Deadline the countdown converges to.
    pub ends_at: Option<EpochMs>,
    /// Milliseconds left, never negative.
    pub remaining_ms: u64,
}

impl Default for TimerDisplayState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Ended,
            ends_at: None,
            remaining_ms: 0,
        }
    }
}

/// Reasons a timer message is left without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerRejection {
    /// Message targets another countdown.
    #[error("timer kind {got} does not match engine kind {expected}")]
    KindMismatch {
        /// Kind this engine tracks.
        expected: TimerKind,
        /// Kind carried by the message.
        got: TimerKind,
    },
    /// Deadline missing or unparseable.
    #[error("timer message for {kind} has no usable deadline")]
    MissingDeadline {
        /// Kind carried by the message.
        kind: TimerKind,
    },
}

/// Result of a local tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer is paused or ended; nothing changed.
    Idle,
    /// Timer is still counting down.
    Running,
    /// Timer reached zero on this tick and is now ended.
    Expired,
}

/// Drift-corrected countdown for a single [`TimerKind`].
pub struct TimerEngine {
    kind: TimerKind,
    clock: SharedClock,
    offset_ms: i64,
    display: TimerDisplayState,
    received_update: bool,
}

impl fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEngine")
            .field("kind", &self.kind)
            .field("offset_ms", &self.offset_ms)
            .field("display", &self.display)
            .field("received_update", &self.received_update)
            .finish()
    }
}

impl TimerEngine {
    /// Create an engine showing an ended, zeroed countdown until the first message arrives.
    pub fn new(kind: TimerKind, clock: SharedClock) -> Self {
        Self::with_initial(kind, clock, TimerDisplayState::default())
    }

    /// Create an engine with a caller-supplied initial readout.
    pub fn with_initial(kind: TimerKind, clock: SharedClock, initial: TimerDisplayState) -> Self {
        Self {
            kind,
            clock,
            offset_ms: 0,
            display: initial,
            received_update: false,
        }
    }

    /// Countdown this engine tracks.
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Current readout.
    pub fn display(&self) -> TimerDisplayState {
        self.display
    }

    /// Current correction applied to local clock reads.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Whether any server message has been applied yet.
    pub fn has_received_update(&self) -> bool {
        self.received_update
    }

    /// Whether local ticks still have an effect.
    pub fn is_ticking(&self) -> bool {
        self.display.status == TimerStatus::Running
    }

    /// Apply a server-declared deadline and status.
    ///
    /// A rejected message leaves the engine untouched, drift offset included.
    pub fn apply(&mut self, message: &TimerMessage) -> Result<TimerDisplayState, TimerRejection> {
        let update = &message.timer;
        if update.kind != self.kind {
            return Err(TimerRejection::KindMismatch {
                expected: self.kind,
                got: update.kind,
            });
        }
        let ends_at = update
            .ends_at
            .ok_or(TimerRejection::MissingDeadline { kind: update.kind })?;

        if let Some(server_now) = update.server_now {
            self.offset_ms = server_now.saturating_sub(self.clock.now_ms());
        }

        let remaining_ms = self.remaining_until(ends_at);
        let status = match update.status {
            TimerStatus::Running if remaining_ms == 0 => TimerStatus::Ended,
            declared => declared,
        };

        self.display = TimerDisplayState {
            status,
            ends_at: Some(ends_at),
            remaining_ms,
        };
        self.received_update = true;

        debug!(
            kind = %self.kind,
            server_timestamp = message.server_timestamp,
            offset_ms = self.offset_ms,
            remaining_ms,
            status = ?status,
            "applied timer message"
        );
        Ok(self.display)
    }

    /// Seed the countdown when no server message is available.
    ///
    /// A deadline starts a running countdown towards it; no deadline leaves the timer ended.
    pub fn seed_fallback(&mut self, deadline: Option<EpochMs>) -> TimerDisplayState {
        self.display = match deadline {
            Some(ends_at) => {
                let remaining_ms = self.remaining_until(ends_at);
                TimerDisplayState {
                    status: if remaining_ms == 0 {
                        TimerStatus::Ended
                    } else {
                        TimerStatus::Running
                    },
                    ends_at: Some(ends_at),
                    remaining_ms,
                }
            }
            None => TimerDisplayState {
                status: TimerStatus::Ended,
                ends_at: None,
                remaining_ms: 0,
            },
        };
        self.display
    }

    /// Advance the countdown from the local clock.
    pub fn tick(&mut self) -> TickOutcome {
        if self.display.status != TimerStatus::Running {
            return TickOutcome::Idle;
        }
        let Some(ends_at) = self.display.ends_at else {
            self.display.status = TimerStatus::Ended;
            self.display.remaining_ms = 0;
            return TickOutcome::Expired;
        };

        self.display.remaining_ms = self.remaining_until(ends_at);
        if self.display.remaining_ms == 0 {
            self.display.status = TimerStatus::Ended;
            TickOutcome::Expired
        } else {
            TickOutcome::Running
        }
    }

    fn remaining_until(&self, ends_at: EpochMs) -> u64 {
        let server_now = self.clock.now_ms().saturating_add(self.offset_ms);
        u64::try_from(ends_at.saturating_sub(server_now)).unwrap_or(0)
    }
}
