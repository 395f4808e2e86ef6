//! Consumer and client configuration

use crate::error::{Error, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-wide defaults
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Defaults for new consumers
    pub consumer: ConsumerOptions,

    /// Defaults for stats polling
    pub stats: StatsPollerConfig,
}

/// Options of a single consumer registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Time between polls
    pub poll_interval: Duration,

    /// Maximum fetch+process units in flight
    pub concurrency: usize,

    /// Acknowledge messages as soon as they are fetched
    pub auto_ack: bool,

    /// Whether `nack` requeues by default
    pub requeue_on_nack: bool,

    /// Starting offset (streams only)
    pub cursor: Option<u64>,

    /// Maximum messages per fetch (streams and topics)
    pub batch_size: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            concurrency: 1,
            auto_ack: false,
            requeue_on_nack: true,
            cursor: None,
            batch_size: 100,
        }
    }
}

impl ConsumerOptions {
    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enables or disables auto-ack.
    #[must_use]
    pub const fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Sets the default requeue behaviour of `nack`.
    #[must_use]
    pub const fn with_requeue_on_nack(mut self, requeue_on_nack: bool) -> Self {
        self.requeue_on_nack = requeue_on_nack;
        self
    }

    /// Sets the starting offset.
    #[must_use]
    pub const fn from_offset(mut self, offset: u64) -> Self {
        self.cursor = Some(offset);
        self
    }

    /// Sets the fetch batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero poll interval, concurrency or
    /// batch size.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be greater than zero".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Stats polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsPollerConfig {
    /// Time between snapshots
    pub interval: Duration,

    /// Retries after a failed fetch before giving up
    pub max_retries: u32,

    /// Delay between retries
    pub retry_delay: Duration,
}

impl Default for StatsPollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl StatsPollerConfig {
    /// Sets the interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero interval.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("stats interval must be greater than zero".into()));
        }
        Ok(())
    }
}
