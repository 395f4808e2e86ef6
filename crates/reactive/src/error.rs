//! Error types for reactive consumers.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by user supplied message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for reactive operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the reactive layer and its channels.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote service could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote service answered with a failure envelope.
    #[error("server error: {0}")]
    Server(String),

    /// A payload could not be decoded into the requested type.
    #[error("failed to decode payload: {0}")]
    Decode(String),

    /// A message handler failed.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    /// The remote service answered an acknowledgement with `success: false`.
    #[error("acknowledgement for message {message_id} was rejected")]
    Rejected {
        /// Message that could not be acknowledged.
        message_id: String,
    },

    /// Consumer or client configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Stats polling gave up after exhausting its retry budget.
    #[error("stats polling for {resource} stopped after {attempts} failed attempts: {source}")]
    StatsExhausted {
        /// Resource whose statistics were being polled.
        resource: String,
        /// Number of consecutive failed attempts.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<Error>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure came from the transport or the remote service
    /// rather than from local decoding or configuration.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Server(_) | Self::Rejected { .. }
        )
    }
}
