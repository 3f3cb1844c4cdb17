#[cfg(feature = "http")]
mod http;
mod error;
mod memory;

use futures::future::BoxFuture;

use crate::dto::snapshot::MissionSnapshot;

pub use self::error::{FetchError, FetchResult};
#[cfg(feature = "http")]
pub use self::http::HttpSnapshotSource;
pub use self::memory::InMemorySnapshotSource;

/// Request/response access to the authoritative mission snapshot.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the full snapshot of `mission_id`.
    fn fetch_snapshot(&self, mission_id: &str) -> BoxFuture<'static, FetchResult<MissionSnapshot>>;
}
