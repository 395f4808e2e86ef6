//! Queue consumers.

use crate::ack::AckHandle;
use crate::channel::{PublishOptions, QueueStats, Resource, ResourceStats};
use crate::client::ClientContext;
use crate::config::{ConsumerOptions, StatsPollerConfig};
use crate::consumer::{ConsumerRegistration, Subscription, start};
use crate::decoder::{JsonDecoder, Payload, RawDecoder, decode_json, encode_json};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::process::{MessageHandler, Processing};
use crate::registry::ConsumerKey;
use crate::stats::{StatsSnapshot, poll_stats};

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Publishes to and consumes from work queues.
#[derive(Clone, Debug)]
pub struct QueueManager {
    context: Arc<ClientContext>,
}

impl QueueManager {
    pub(crate) const fn new(context: Arc<ClientContext>) -> Self {
        Self { context }
    }

    /// Consumer options from the client configuration.
    #[must_use]
    pub fn default_options(&self) -> ConsumerOptions {
        self.context.config.consumer.clone()
    }

    /// Publishes raw bytes and returns the message id.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or [`Error::Server`] if the service did not
    /// return a message id.
    pub async fn publish(
        &self,
        queue: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<String> {
        let receipt = self
            .context
            .channel
            .publish(&Resource::queue(queue), payload.into(), options)
            .await?;

        receipt
            .id
            .ok_or_else(|| Error::Server("publish reply carried no message id".into()))
    }

    /// Publishes a value as JSON and returns the message id.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish); also fails with [`Error::Json`] if the
    /// value cannot be serialized.
    pub async fn publish_json<T>(&self, queue: &str, value: &T, options: PublishOptions) -> Result<String>
    where
        T: Serialize + ?Sized + Sync,
    {
        let payload = encode_json(value)?;
        self.publish(queue, payload, options).await
    }

    /// Fetches a single message, if one is available, and decodes it as JSON.
    ///
    /// The returned envelope must be acked or nacked like any other.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or [`Error::Decode`] if the payload is not
    /// valid JSON for `T`. An undecodable message is left pending.
    pub async fn consume_json<T>(&self, queue: &str, consumer_id: &str) -> Result<Option<Envelope<T>>>
    where
        T: DeserializeOwned,
    {
        let resource = Resource::queue(queue);
        let fetched = self
            .context
            .channel
            .consume(&resource, consumer_id, None, 1)
            .await?;

        let Some(raw) = fetched.messages.into_iter().next() else {
            return Ok(None);
        };

        let value = decode_json(&raw.payload)?;
        let handle = AckHandle::pending(
            Arc::clone(&self.context.channel),
            resource,
            raw.id.clone(),
            self.context.config.consumer.requeue_on_nack,
            None,
        );

        Ok(Some(Envelope::new(raw, Payload::Decoded(value), handle)))
    }

    /// Starts a consumer delivering raw payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn observe(
        &self,
        queue: &str,
        consumer_id: &str,
        options: ConsumerOptions,
    ) -> Result<Subscription<Bytes>> {
        self.spawn_consumer(queue, consumer_id, options, Arc::new(RawDecoder))
    }

    /// Starts a consumer decoding payloads as JSON.
    ///
    /// Messages that are not valid JSON for `T` are dead-lettered and never
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn observe_json<T>(
        &self,
        queue: &str,
        consumer_id: &str,
        options: ConsumerOptions,
    ) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.spawn_consumer(queue, consumer_id, options, Arc::new(JsonDecoder::<T>::strict()))
    }

    /// Starts a consumer that runs `handler` on every raw message, acking on
    /// success and nacking on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn process<H>(
        &self,
        queue: &str,
        consumer_id: &str,
        options: ConsumerOptions,
        handler: H,
    ) -> Result<Processing>
    where
        H: MessageHandler<Bytes>,
    {
        let concurrency = options.concurrency;
        let subscription = self.observe(queue, consumer_id, options)?;

        Ok(Processing::new(subscription, concurrency, handler))
    }

    /// Like [`process`](Self::process), with payloads decoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` are invalid.
    pub fn process_json<T, H>(
        &self,
        queue: &str,
        consumer_id: &str,
        options: ConsumerOptions,
        handler: H,
    ) -> Result<Processing>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        let concurrency = options.concurrency;
        let subscription = self.observe_json::<T>(queue, consumer_id, options)?;

        Ok(Processing::new(subscription, concurrency, handler))
    }

    /// Fetches queue statistics.
    ///
    /// # Errors
    ///
    /// Returns the channel error, or [`Error::Server`] if the service
    /// answered with statistics of another kind.
    pub async fn stats(&self, queue: &str) -> Result<QueueStats> {
        match self.context.channel.stats(&Resource::queue(queue)).await? {
            ResourceStats::Queue(stats) => Ok(stats),
            other => Err(Error::Server(format!(
                "expected queue statistics, got {other:?}"
            ))),
        }
    }

    /// Polls queue statistics with the client's stats configuration.
    pub fn poll_stats(&self, queue: &str) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        self.poll_stats_with(queue, self.context.config.stats.clone())
    }

    /// Polls queue statistics.
    ///
    /// An invalid `config` ends the stream after a single [`Error::Config`].
    pub fn poll_stats_with(
        &self,
        queue: &str,
        config: StatsPollerConfig,
    ) -> impl Stream<Item = Result<StatsSnapshot>> + Send + use<> {
        poll_stats(
            Arc::clone(&self.context.channel),
            Resource::queue(queue),
            config,
            self.context.registry.child_token(),
        )
    }

    /// Stops a consumer. Returns `false` if it was not running.
    pub fn stop(&self, queue: &str, consumer_id: &str) -> bool {
        debug!(queue, consumer_id, "stopping queue consumer");
        self.context
            .registry
            .stop(&ConsumerKey::new(Resource::queue(queue), consumer_id))
    }

    fn spawn_consumer<T>(
        &self,
        queue: &str,
        consumer_id: &str,
        options: ConsumerOptions,
        decoder: Arc<dyn crate::decoder::Decoder<T>>,
    ) -> Result<Subscription<T>>
    where
        T: Send + 'static,
    {
        start(
            Arc::clone(&self.context.channel),
            &self.context.registry,
            ConsumerRegistration::new(Resource::queue(queue), consumer_id, options),
            decoder,
        )
    }
}
