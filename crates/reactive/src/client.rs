use crate::channel::RemoteChannel;
use crate::config::ReactiveConfig;
use crate::error::Result;
use crate::pubsub::PubSubManager;
use crate::queue::QueueManager;
use crate::registry::{ConsumerKey, LifecycleRegistry};
use crate::stream::StreamManager;

use std::sync::Arc;

use tracing::debug;

/// State shared by the client and its managers.
#[derive(Debug)]
pub(crate) struct ClientContext {
    pub(crate) channel: Arc<dyn RemoteChannel>,
    pub(crate) registry: Arc<LifecycleRegistry>,
    pub(crate) config: ReactiveConfig,
}

/// Entry point for reactive consumers.
///
/// The client owns the [`LifecycleRegistry`] every consumer it starts is
/// registered in, so [`stop_all`](Self::stop_all) and
/// [`shutdown`](Self::shutdown) reach consumers started through any of its
/// managers. Cloning the client shares that registry.
#[derive(Clone, Debug)]
pub struct ReactiveClient {
    context: Arc<ClientContext>,
}

impl ReactiveClient {
    /// Creates a client with default configuration.
    pub fn new(channel: Arc<dyn RemoteChannel>) -> Self {
        Self::from_parts(channel, ReactiveConfig::default())
    }

    /// Creates a client with the given defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the defaults are
    /// invalid.
    pub fn with_config(channel: Arc<dyn RemoteChannel>, config: ReactiveConfig) -> Result<Self> {
        config.consumer.validate()?;
        config.stats.validate()?;

        Ok(Self::from_parts(channel, config))
    }

    fn from_parts(channel: Arc<dyn RemoteChannel>, config: ReactiveConfig) -> Self {
        Self {
            context: Arc::new(ClientContext {
                channel,
                registry: Arc::new(LifecycleRegistry::new()),
                config,
            }),
        }
    }

    /// Queue consumers and helpers.
    #[must_use]
    pub fn queue(&self) -> QueueManager {
        QueueManager::new(Arc::clone(&self.context))
    }

    /// Event stream consumers and helpers.
    #[must_use]
    pub fn stream(&self) -> StreamManager {
        StreamManager::new(Arc::clone(&self.context))
    }

    /// Pub/sub subscriptions and helpers.
    #[must_use]
    pub fn pubsub(&self) -> PubSubManager {
        PubSubManager::new(Arc::clone(&self.context))
    }

    /// The client defaults.
    #[must_use]
    pub fn config(&self) -> &ReactiveConfig {
        &self.context.config
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn RemoteChannel> {
        &self.context.channel
    }

    /// The consumer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.context.registry
    }

    /// Stops one consumer. Returns `false` if it was not running.
    pub fn stop_consumer(&self, key: &ConsumerKey) -> bool {
        self.context.registry.stop(key)
    }

    /// Stops every consumer started so far. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let stopped = self.context.registry.stop_all();
        debug!(stopped, "stopped all consumers");
        stopped
    }

    /// Stops every consumer and stats poller, including ones started later.
    pub fn shutdown(&self) {
        debug!("shutting down reactive client");
        self.context.registry.shutdown();
    }

    /// Keys of the running consumers.
    #[must_use]
    pub fn active_consumers(&self) -> Vec<ConsumerKey> {
        self.context.registry.active_keys()
    }
}
