//! In-memory implementation of the reactive remote channel.
//!
//! [`MemoryChannel`] keeps queues, stream rooms and pub/sub topics in process
//! and reproduces the service semantics the reactive layer relies on:
//! priority queues with a pending set, redelivery and dead-lettering,
//! sequential stream offsets and per-subscriber topic inboxes. Faults can be
//! injected per operation to exercise failure handling.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod queue;
mod room;
mod topic;

pub use error::Error;
pub use queue::MemoryQueueConfig;

use queue::MemoryQueue;
use room::{Room, unix_now};
use topic::Topics;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use synap_reactive::{
    AckReceipt, Fetched, PublishOptions, PublishReceipt, RawMessage, RemoteChannel, Resource,
    ResourceKind, ResourceStats,
};
use tracing::debug;

static SHARED: LazyLock<Arc<MemoryChannel>> = LazyLock::new(|| Arc::new(MemoryChannel::new()));

/// Channel operations, for fault injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `consume`
    Consume,
    /// `ack`
    Ack,
    /// `nack`
    Nack,
    /// `publish`
    Publish,
    /// `stats`
    Stats,
}

/// Sizing of the in-memory service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryChannelConfig {
    /// Configuration applied to every queue.
    pub queue: MemoryQueueConfig,
    /// Events retained per stream room.
    pub room_capacity: usize,
    /// Messages buffered per topic subscriber.
    pub inbox_capacity: usize,
}

impl Default for MemoryChannelConfig {
    fn default() -> Self {
        Self {
            queue: MemoryQueueConfig::default(),
            room_capacity: 10_000,
            inbox_capacity: 10_000,
        }
    }
}

/// A [`RemoteChannel`] backed by process memory.
///
/// Queues and rooms are created on first use.
#[derive(Debug)]
pub struct MemoryChannel {
    config: MemoryChannelConfig,
    queues: Mutex<HashMap<String, MemoryQueue>>,
    rooms: Mutex<HashMap<String, Room>>,
    topics: Mutex<Topics>,
    faults: DashMap<Operation, VecDeque<synap_reactive::Error>>,
    calls: DashMap<Operation, u64>,
}

impl MemoryChannel {
    /// Creates an empty channel with default sizing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MemoryChannelConfig::default())
    }

    /// Creates an empty channel.
    #[must_use]
    pub fn with_config(config: MemoryChannelConfig) -> Self {
        Self {
            topics: Mutex::new(Topics::new(config.inbox_capacity)),
            config,
            queues: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            faults: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// The process-wide channel. Call [`reset`](Self::reset) between users
    /// that must not see each other's state.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Drops every queue, room, topic, pending fault and call count.
    pub fn reset(&self) {
        self.queues.lock().clear();
        self.rooms.lock().clear();
        *self.topics.lock() = Topics::new(self.config.inbox_capacity);
        self.faults.clear();
        self.calls.clear();
    }

    /// Makes the next call of `operation` fail with `error`. Faults queue up:
    /// calling this twice fails the next two calls.
    pub fn fail_next(&self, operation: Operation, error: synap_reactive::Error) {
        self.faults.entry(operation).or_default().push_back(error);
    }

    /// How many times `operation` was called, including failed calls.
    #[must_use]
    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls.get(&operation).map_or(0, |count| *count)
    }

    /// Messages moved to a queue's dead letter queue.
    #[must_use]
    pub fn dead_letters(&self, queue: &str) -> Vec<RawMessage> {
        self.queues
            .lock()
            .get(queue)
            .map(MemoryQueue::dead_letters)
            .unwrap_or_default()
    }

    /// Messages delivered from a queue and not yet settled.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .get(queue)
            .map_or(0, MemoryQueue::pending_count)
    }

    fn enter(&self, operation: Operation) -> synap_reactive::Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        let fault = self
            .faults
            .get_mut(&operation)
            .and_then(|mut faults| faults.pop_front());

        fault.map_or(Ok(()), Err)
    }

    fn with_queue<R>(&self, name: &str, f: impl FnOnce(&mut MemoryQueue) -> R) -> R {
        let mut queues = self.queues.lock();
        let queue = queues
            .entry(name.to_string())
            .or_insert_with(|| MemoryQueue::new(name, self.config.queue.clone()));

        f(queue)
    }

    fn with_room<R>(&self, name: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut rooms = self.rooms.lock();
        let room = rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name, self.config.room_capacity));

        f(room)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn consume(
        &self,
        resource: &Resource,
        consumer_id: &str,
        cursor: Option<u64>,
        limit: usize,
    ) -> synap_reactive::Result<Fetched> {
        self.enter(Operation::Consume)?;

        match resource.kind {
            ResourceKind::Queue => Ok(self
                .with_queue(&resource.name, |queue| queue.consume(consumer_id))
                .map_or_else(Fetched::empty, Fetched::single)),

            ResourceKind::Stream => {
                let (messages, next) = self.with_room(&resource.name, |room| {
                    room.read(consumer_id, cursor.unwrap_or(0), limit)
                });

                Ok(Fetched {
                    messages,
                    next_cursor: Some(next),
                })
            }

            ResourceKind::Topic => {
                let messages = self
                    .topics
                    .lock()
                    .drain(&resource.name, consumer_id, limit)?;

                Ok(Fetched {
                    messages,
                    next_cursor: None,
                })
            }
        }
    }

    async fn ack(&self, resource: &Resource, message_id: &str) -> synap_reactive::Result<AckReceipt> {
        self.enter(Operation::Ack)?;

        let success = match resource.kind {
            ResourceKind::Queue => self
                .queues
                .lock()
                .get_mut(&resource.name)
                .is_some_and(|queue| queue.ack(message_id)),
            ResourceKind::Stream | ResourceKind::Topic => true,
        };

        Ok(AckReceipt { success })
    }

    async fn nack(
        &self,
        resource: &Resource,
        message_id: &str,
        requeue: bool,
    ) -> synap_reactive::Result<AckReceipt> {
        self.enter(Operation::Nack)?;

        let success = match resource.kind {
            ResourceKind::Queue => self
                .queues
                .lock()
                .get_mut(&resource.name)
                .is_some_and(|queue| queue.nack(message_id, requeue)),
            ResourceKind::Stream | ResourceKind::Topic => true,
        };

        Ok(AckReceipt { success })
    }

    async fn publish(
        &self,
        resource: &Resource,
        payload: Bytes,
        options: PublishOptions,
    ) -> synap_reactive::Result<PublishReceipt> {
        self.enter(Operation::Publish)?;
        debug!(%resource, bytes = payload.len(), "publish");

        match resource.kind {
            ResourceKind::Queue => {
                let id = self.with_queue(&resource.name, |queue| {
                    queue.publish(payload, options.priority, options.max_retries, options.headers)
                })?;

                Ok(PublishReceipt {
                    id: Some(id),
                    ..PublishReceipt::default()
                })
            }

            ResourceKind::Stream => {
                let event = options.name.unwrap_or_else(|| "message".to_string());
                let offset = self.with_room(&resource.name, |room| {
                    room.publish(event, payload, options.headers)
                });

                Ok(PublishReceipt {
                    offset: Some(offset),
                    ..PublishReceipt::default()
                })
            }

            ResourceKind::Topic => {
                let delivered = self.topics.lock().publish(
                    &resource.name,
                    payload,
                    options.priority,
                    options.headers,
                    unix_now(),
                );

                Ok(PublishReceipt {
                    delivered: Some(delivered),
                    ..PublishReceipt::default()
                })
            }
        }
    }

    async fn stats(&self, resource: &Resource) -> synap_reactive::Result<ResourceStats> {
        self.enter(Operation::Stats)?;

        match resource.kind {
            ResourceKind::Queue => self
                .queues
                .lock()
                .get(&resource.name)
                .map(|queue| ResourceStats::Queue(queue.stats()))
                .ok_or_else(|| Error::NotFound(resource.to_string()).into()),

            ResourceKind::Stream => self
                .rooms
                .lock()
                .get(&resource.name)
                .map(|room| ResourceStats::Stream(room.stats()))
                .ok_or_else(|| Error::NotFound(resource.to_string()).into()),

            ResourceKind::Topic => Ok(ResourceStats::Topic(self.topics.lock().stats())),
        }
    }

    async fn release(&self, resource: &Resource, consumer_id: &str) {
        if resource.kind == ResourceKind::Topic {
            debug!(%resource, consumer_id, "dropping topic inbox");
            self.topics.lock().unsubscribe(&resource.name, consumer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serial_test::serial;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_queue_round_trip() {
        let channel = MemoryChannel::new();
        let queue = Resource::queue("tasks");

        let receipt = channel
            .publish(&queue, Bytes::from_static(b"job"), PublishOptions::default())
            .await
            .unwrap();
        let fetched = channel.consume(&queue, "c1", None, 1).await.unwrap();

        assert_eq!(fetched.messages.len(), 1);
        assert_eq!(Some(fetched.messages[0].id.clone()), receipt.id);
        assert_eq!(channel.pending("tasks"), 1);

        let ack = channel.ack(&queue, &fetched.messages[0].id).await.unwrap();
        assert!(ack.success);
        assert_eq!(channel.pending("tasks"), 0);
    }

    #[tokio::test]
    async fn test_unknown_message_ack_is_rejected() {
        let channel = MemoryChannel::new();

        let ack = channel.ack(&Resource::queue("tasks"), "nope").await.unwrap();

        assert!(!ack.success);
    }

    #[tokio::test]
    async fn test_fault_injection_fails_next_call_only() {
        let channel = MemoryChannel::new();
        let queue = Resource::queue("tasks");
        channel.fail_next(
            Operation::Consume,
            synap_reactive::Error::Network("connection refused".into()),
        );

        assert!(matches!(
            channel.consume(&queue, "c1", None, 1).await,
            Err(synap_reactive::Error::Network(_))
        ));
        assert!(channel.consume(&queue, "c1", None, 1).await.is_ok());
        assert_eq!(channel.calls(Operation::Consume), 2);
        assert_eq!(channel.calls(Operation::Ack), 0);
    }

    #[tokio::test]
    async fn test_stream_reports_next_cursor() {
        let channel = MemoryChannel::new();
        let room = Resource::stream("chat");
        for _ in 0..3 {
            channel
                .publish(&room, Bytes::from_static(b"{}"), PublishOptions::default().with_name("msg"))
                .await
                .unwrap();
        }

        let fetched = channel.consume(&room, "reader", Some(1), 10).await.unwrap();

        assert_eq!(fetched.messages.len(), 2);
        assert_eq!(fetched.next_cursor, Some(3));
        assert_eq!(fetched.messages[0].name.as_deref(), Some("msg"));
    }

    #[tokio::test]
    async fn test_stats_for_unknown_queue_fail() {
        let channel = MemoryChannel::new();

        let result = channel.stats(&Resource::queue("ghost")).await;

        assert!(matches!(result, Err(synap_reactive::Error::Server(_))));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_release_drops_topic_inbox() {
        let channel = MemoryChannel::new();
        let topic = Resource::topic("news");

        channel.consume(&topic, "s1", None, 10).await.unwrap();
        channel.release(&topic, "s1").await;

        let receipt = channel
            .publish(&topic, Bytes::from_static(b"{}"), PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.delivered, Some(0));
        assert!(logs_contain("dropping topic inbox"));
    }

    #[tokio::test]
    #[serial]
    async fn test_shared_channel_reset() {
        let channel = MemoryChannel::shared();
        channel
            .publish(&Resource::queue("shared"), Bytes::from_static(b"x"), PublishOptions::default())
            .await
            .unwrap();

        MemoryChannel::shared().reset();

        assert!(channel.stats(&Resource::queue("shared")).await.is_err());
        assert_eq!(channel.calls(Operation::Publish), 0);
    }
}
