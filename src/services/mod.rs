/// Periodic snapshot polling while the push channel is down.
pub mod fallback_poller;
/// Mission session event loop and its handle.
pub mod session;
/// One-shot snapshot fetch used at mount and after reconnects.
pub mod snapshot_sync;

pub use self::session::{MissionHandle, MissionSession, MissionSink, TimersView};
