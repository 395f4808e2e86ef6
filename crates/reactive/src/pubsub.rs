//! Pub/sub subscriptions.
//!
//! Topic names are passed to the channel unchanged, so wildcard patterns
//! (`events.*`, `events.#`) work wherever the service supports them.

use crate::channel::{PublishOptions, Resource, ResourceStats, TopicStats};
use crate::client::ClientContext;
use crate::config::{ConsumerOptions, StatsPollerConfig};
use crate::consumer::{ConsumerRegistration, Subscription, start};
use crate::decoder::{JsonDecoder, encode_json};
use crate::error::{Error, Result};
use crate::registry::ConsumerKey;
use crate::stats::{StatsSnapshot, poll_stats};

use std::sync::Arc;

use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Name under which system-wide pub/sub statistics are requested.
pub const ALL_TOPICS: &str = "*";

/// Publishes to and subscribes to topics.
#[derive(Clone, Debug)]
pub struct PubSubManager {
    context: Arc<ClientContext>,
}

impl PubSubManager {
    pub(crate) const fn new(context: Arc<ClientContext>) -> Self {
        Self { context }
    }

    /// Consumer options from the client configuration.
    #[must_use]
    pub fn default_options(&self) -> ConsumerOptions {
        self.context.config.consumer.clone()
    }

    /// Publishes a JSON message and returns how many subscribers it reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `data` cannot be serialized or the channel
    /// error.
    pub async fn publish<T>(&self, topic: &str, data: &T, options: PublishOptions) -> Result<usize>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = encode_json(data)?;
        let receipt = self
            .context
            .channel
            .publish(&Resource::topic(topic), payload, options)
            .await?;

        Ok(receipt.delivered.unwrap_or_default())
    }

    /// Subscribes to a topic. Messages published before the first poll are
    /// not delivered.
    ///
    /// Bodies that are not valid JSON for `T` are delivered as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn subscribe<T>(
        &self,
        topic: &str,
        subscriber_id: &str,
        options: ConsumerOptions,
    ) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        start(
            Arc::clone(&self.context.channel),
            &self.context.registry,
            ConsumerRegistration::new(Resource::topic(topic), subscriber_id, options),
            Arc::new(JsonDecoder::<T>::pass_through()),
        )
    }

    /// Fetches system-wide pub/sub statistics.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or [`Error::Server`] if the service
    /// answered with statistics of another kind.
    pub async fn stats(&self) -> Result<TopicStats> {
        match self.context.channel.stats(&Resource::topic(ALL_TOPICS)).await? {
            ResourceStats::Topic(stats) => Ok(stats),
            other => Err(Error::Server(format!(
                "expected pub/sub statistics, got {other:?}"
            ))),
        }
    }

    /// Polls pub/sub statistics with the client's stats configuration.
    pub fn poll_stats(&self) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        self.poll_stats_with(self.context.config.stats.clone())
    }

    /// Polls pub/sub statistics.
    ///
    /// An invalid `config` ends the stream after a single [`Error::Config`].
    pub fn poll_stats_with(
        &self,
        config: StatsPollerConfig,
    ) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        poll_stats(
            Arc::clone(&self.context.channel),
            Resource::topic(ALL_TOPICS),
            config,
            self.context.registry.child_token(),
        )
    }

    /// Stops a subscriber. Returns `false` if it was not running.
    pub fn stop(&self, topic: &str, subscriber_id: &str) -> bool {
        debug!(topic, subscriber_id, "stopping topic subscriber");
        self.context
            .registry
            .stop(&ConsumerKey::new(Resource::topic(topic), subscriber_id))
    }
}
