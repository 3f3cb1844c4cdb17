use thiserror::Error;

use crate::state::{PlanError, ResolveError};

/// A push payload that could not be turned into a message.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The raw text is not a JSON envelope we understand.
    #[error("failed to decode push payload")]
    Decode(#[source] serde_json::Error),
}

/// Errors returned to callers of a mounted mission session.
///
/// Realtime failures never surface here; they are logged and the session keeps its last
/// known state. Only explicit caller requests can fail.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session was unmounted before the request could be handled.
    #[error("mission session is no longer mounted")]
    Unmounted,
    /// The tentative update could not be planned.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// The pending update could not be committed or reverted.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The server rejected the tentative update; it was reverted.
    #[error("optimistic update rejected: {0}")]
    Rejected(String),
}

/// Required runtime configuration is missing or invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// An instant could not be parsed.
    #[error("invalid instant `{value}` for `{field}`")]
    InvalidInstant {
        /// Configuration field holding the value.
        field: &'static str,
        /// Raw value.
        value: String,
    },
}
