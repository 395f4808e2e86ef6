use thiserror::Error;

/// Errors raised by the in-memory service.
#[derive(Debug, Error)]
pub enum Error {
    /// The queue reached its configured depth.
    #[error("queue `{0}` is full")]
    QueueFull(String),

    /// Statistics were requested for a resource that was never used.
    #[error("`{0}` not found")]
    NotFound(String),

    /// A topic pattern is malformed.
    #[error("invalid topic pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl From<Error> for synap_reactive::Error {
    fn from(error: Error) -> Self {
        Self::Server(error.to_string())
    }
}
