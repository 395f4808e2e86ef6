//! HTTP channel configuration

use crate::error::{Error, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const COMMAND_PATH: &str = "api/v1/command";
const PUBSUB_WS_PATH: &str = "pubsub/ws";

/// Where and how to reach the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpChannelConfig {
    /// Base URL of the service, e.g. `http://localhost:15500`.
    pub base_url: String,

    /// Timeout of a single command request.
    pub timeout: Duration,

    /// Bearer token sent with every request.
    pub auth_token: Option<String>,

    /// Messages buffered per topic subscriber between polls. The oldest are
    /// dropped when full. Must be at least 1.
    pub bridge_capacity: usize,
}

impl Default for HttpChannelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:15500".to_string(),
            timeout: Duration::from_secs(30),
            auth_token: None,
            bridge_capacity: 10_000,
        }
    }
}

impl HttpChannelConfig {
    /// Configuration for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the per-subscriber topic buffer.
    #[must_use]
    pub const fn with_bridge_capacity(mut self, capacity: usize) -> Self {
        self.bridge_capacity = capacity;
        self
    }

    /// URL of the command endpoint.
    pub(crate) fn command_url(&self) -> Result<Url> {
        Ok(self.base()?.join(COMMAND_PATH)?)
    }

    /// URL of the pub/sub WebSocket for `topics`.
    pub(crate) fn pubsub_url(&self, topics: &str) -> Result<Url> {
        let mut url = self.base()?.join(PUBSUB_WS_PATH)?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(Error::Config(format!(
                    "unsupported scheme {other} in {}",
                    self.base_url
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::Config(format!("cannot switch {} to {scheme}", self.base_url)))?;
        url.query_pairs_mut().append_pair("topics", topics);

        Ok(url)
    }

    fn base(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;

        // `join` replaces the last path segment unless the path ends in `/`.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HttpChannelConfig::default();

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_command_url_keeps_base_path() {
        let config = HttpChannelConfig::new("http://localhost:15500/synap");

        assert_eq!(
            config.command_url().unwrap().as_str(),
            "http://localhost:15500/synap/api/v1/command"
        );
    }

    #[test]
    fn test_pubsub_url_switches_scheme() {
        let plain = HttpChannelConfig::new("http://localhost:15500");
        let tls = HttpChannelConfig::new("https://synap.example.com");

        assert_eq!(
            plain.pubsub_url("events.user").unwrap().as_str(),
            "ws://localhost:15500/pubsub/ws?topics=events.user"
        );
        assert_eq!(
            tls.pubsub_url("news").unwrap().as_str(),
            "wss://synap.example.com/pubsub/ws?topics=news"
        );
    }

    #[test]
    fn test_pubsub_url_escapes_multi_level_wildcard() {
        let config = HttpChannelConfig::new("http://localhost:15500");

        let url = config.pubsub_url("events.#").unwrap();

        assert_eq!(url.query(), Some("topics=events.%23"));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_unsupported_scheme() {
        let config = HttpChannelConfig::new("ftp://localhost");

        assert!(matches!(config.pubsub_url("news"), Err(Error::Config(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: HttpChannelConfig =
            serde_json::from_str(r#"{"base_url": "http://synap:15500", "auth_token": "secret"}"#)
                .unwrap();

        assert_eq!(config.base_url, "http://synap:15500");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
