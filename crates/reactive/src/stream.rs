//! Event stream consumers.
//!
//! Stream rooms are append-only logs read by offset. There is no server-side
//! pending set, so acknowledging a stream event is a local no-op and the only
//! progress marker is the subscription cursor.

use crate::channel::{PublishOptions, Resource, ResourceStats, StreamStats};
use crate::client::ClientContext;
use crate::config::{ConsumerOptions, StatsPollerConfig};
use crate::consumer::{ConsumerRegistration, Subscription, start};
use crate::decoder::{JsonDecoder, encode_json};
use crate::error::{Error, Result};
use crate::filter::EventFilter;
use crate::registry::ConsumerKey;
use crate::stats::{StatsSnapshot, poll_stats};

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Publishes to and reads from stream rooms.
#[derive(Clone, Debug)]
pub struct StreamManager {
    context: Arc<ClientContext>,
}

impl StreamManager {
    pub(crate) const fn new(context: Arc<ClientContext>) -> Self {
        Self { context }
    }

    /// Consumer options from the client configuration.
    #[must_use]
    pub fn default_options(&self) -> ConsumerOptions {
        self.context.config.consumer.clone()
    }

    /// Appends a named event with a JSON body and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `data` cannot be serialized, the channel
    /// error, or [`Error::Server`] if the reply carried no offset.
    pub async fn publish<T>(&self, room: &str, event: &str, data: &T) -> Result<u64>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = encode_json(data)?;
        self.publish_raw(room, event, payload).await
    }

    /// Appends a named event with an opaque body and returns its offset.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub async fn publish_raw(&self, room: &str, event: &str, payload: impl Into<Bytes>) -> Result<u64> {
        let receipt = self
            .context
            .channel
            .publish(
                &Resource::stream(room),
                payload.into(),
                PublishOptions::default().with_name(event),
            )
            .await?;

        receipt
            .offset
            .ok_or_else(|| Error::Server("publish reply carried no offset".into()))
    }

    /// Reads every event of a room from `options.cursor` (or offset 0).
    ///
    /// Bodies that are not valid JSON for `T` are delivered as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn observe_events<T>(
        &self,
        room: &str,
        subscriber_id: &str,
        options: ConsumerOptions,
    ) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        start(
            Arc::clone(&self.context.channel),
            &self.context.registry,
            ConsumerRegistration::new(Resource::stream(room), subscriber_id, options),
            Arc::new(JsonDecoder::<T>::pass_through()),
        )
    }

    /// Like [`observe_events`](Self::observe_events), keeping only events
    /// named `event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn observe_event<T>(
        &self,
        room: &str,
        subscriber_id: &str,
        event: &str,
        options: ConsumerOptions,
    ) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self
            .observe_events(room, subscriber_id, options)?
            .with_filter(EventFilter::name(event)))
    }

    /// Fetches room statistics.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or [`Error::Server`] if the service
    /// answered with statistics of another kind.
    pub async fn stats(&self, room: &str) -> Result<StreamStats> {
        match self.context.channel.stats(&Resource::stream(room)).await? {
            ResourceStats::Stream(stats) => Ok(stats),
            other => Err(Error::Server(format!(
                "expected stream statistics, got {other:?}"
            ))),
        }
    }

    /// Polls room statistics with the client's stats configuration.
    pub fn poll_stats(&self, room: &str) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        self.poll_stats_with(room, self.context.config.stats.clone())
    }

    /// Polls room statistics.
    ///
    /// An invalid `config` ends the stream after a single [`Error::Config`].
    pub fn poll_stats_with(
        &self,
        room: &str,
        config: StatsPollerConfig,
    ) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        poll_stats(
            Arc::clone(&self.context.channel),
            Resource::stream(room),
            config,
            self.context.registry.child_token(),
        )
    }

    /// Stops a subscriber. Returns `false` if it was not running.
    pub fn stop(&self, room: &str, subscriber_id: &str) -> bool {
        debug!(room, subscriber_id, "stopping stream subscriber");
        self.context
            .registry
            .stop(&ConsumerKey::new(Resource::stream(room), subscriber_id))
    }
}
