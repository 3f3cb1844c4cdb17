//! Error types shared by the snapshot sources.

use thiserror::Error;

/// Convenient result alias returning [`FetchError`] failures.
pub type FetchResult<T> = Result<T, FetchError>;

/// Failures that can occur while fetching a mission snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[cfg(feature = "http")]
    #[error("failed to build HTTP client")]
    ClientBuilder {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The snapshot request could not be sent.
    #[cfg(feature = "http")]
    #[error("failed to request snapshot for mission `{mission_id}`")]
    RequestSend {
        /// Mission whose snapshot was requested.
        mission_id: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status code.
    #[error("unexpected snapshot response status {status} for mission `{mission_id}`")]
    RequestStatus {
        /// Mission whose snapshot was requested.
        mission_id: String,
        /// HTTP status returned by the server.
        status: u16,
    },
    /// Response payload could not be decoded.
    #[cfg(feature = "http")]
    #[error("failed to decode snapshot for mission `{mission_id}`")]
    DecodeResponse {
        /// Mission whose snapshot was requested.
        mission_id: String,
        /// Body decoding error.
        #[source]
        source: reqwest::Error,
    },
    /// No snapshot is available from this source.
    #[error("snapshot for mission `{mission_id}` unavailable")]
    Unavailable {
        /// Mission whose snapshot was requested.
        mission_id: String,
    },
}
