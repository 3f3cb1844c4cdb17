/// Snapshot retrieval from the mission server.
pub mod snapshot;
