use std::time::Duration;

use thiserror::Error;

/// Errors of the HTTP channel.
#[derive(Debug, Error)]
pub enum Error {
    /// The service answered a command with `success: false`.
    #[error("command {command} failed: {message}")]
    Command {
        /// The command sent.
        command: &'static str,
        /// The service's error message.
        message: String,
    },

    /// Invalid channel configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The HTTP request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A request or reply body could not be (de)serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The topic bridge's WebSocket failed or was closed.
    #[error("topic bridge closed: {0}")]
    BridgeClosed(String),

    /// The WebSocket handshake failed.
    #[error(transparent)]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A URL could not be built.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Maps to the reactive layer's error, reporting timeouts with the
    /// configured `timeout`.
    pub(crate) fn into_reactive(self, timeout: Duration) -> synap_reactive::Error {
        match self {
            Self::Http(error) if error.is_timeout() => synap_reactive::Error::Timeout(timeout),
            Self::Http(error) if error.is_decode() => {
                synap_reactive::Error::Decode(error.to_string())
            }
            Self::Http(error) => synap_reactive::Error::Network(error.to_string()),
            Self::WebSocket(error) => synap_reactive::Error::Network(error.to_string()),
            Self::BridgeClosed(reason) => synap_reactive::Error::Network(reason),
            Self::Json(error) => synap_reactive::Error::Decode(error.to_string()),
            Self::Config(message) => synap_reactive::Error::Config(message),
            Self::Url(error) => synap_reactive::Error::Config(error.to_string()),
            error @ (Self::Command { .. } | Self::Status { .. }) => {
                synap_reactive::Error::Server(error.to_string())
            }
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

/// Result alias for the HTTP channel.
pub type Result<T, E = Error> = std::result::Result<T, E>;
