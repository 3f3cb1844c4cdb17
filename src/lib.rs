//! Realtime reconciliation engine for mission clients: HUD merging, drift-corrected timers,
//! push subscriptions and fallback polling.

/// Push channel adapter and transports.
pub mod channel;
/// Wall-clock abstraction.
pub mod clock;
/// Session configuration loading.
pub mod config;
/// Snapshot sources.
pub mod dao;
/// Wire formats for push payloads and snapshots.
pub mod dto;
/// Crate-wide error types.
pub mod error;
/// Session orchestration.
pub mod services;
/// HUD, timer, optimistic and connection state.
pub mod state;

pub use self::config::SyncConfig;
pub use self::services::{MissionHandle, MissionSession, MissionSink, TimersView};
