use crate::error::Result;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The family a remote resource belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Work queue with acknowledgements and redelivery.
    Queue,
    /// Append-only event stream (a "room") read by offset.
    Stream,
    /// Pub/sub topic.
    Topic,
}

impl ResourceKind {
    /// Lowercase name used in logs and command names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Stream => "stream",
            Self::Topic => "topic",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named queue, stream room or topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource family.
    pub kind: ResourceKind,
    /// Name on the remote service.
    pub name: String,
}

impl Resource {
    /// A queue resource.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Queue,
            name: name.into(),
        }
    }

    /// A stream room resource.
    pub fn stream(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Stream,
            name: name.into(),
        }
    }

    /// A pub/sub topic resource.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Topic,
            name: name.into(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// A message as handed out by the remote service, before decoding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// Message or event identifier.
    pub id: String,
    /// Undecoded payload bytes.
    pub payload: Bytes,
    /// Priority 0-9 (queues and topics).
    pub priority: Option<u8>,
    /// How many times the message has been redelivered.
    pub retry_count: u32,
    /// Position in the stream (streams only).
    pub offset: Option<u64>,
    /// Unix timestamp in seconds, when the service provides one.
    pub timestamp: Option<u64>,
    /// Event name for stream events, topic for pub/sub messages.
    pub name: Option<String>,
    /// Free-form metadata.
    pub headers: HashMap<String, String>,
}

/// The result of one `consume` call.
#[derive(Clone, Debug, Default)]
pub struct Fetched {
    /// Messages handed out, oldest first. Empty when nothing was available.
    pub messages: Vec<RawMessage>,
    /// Next read position reported by the service (streams only).
    pub next_cursor: Option<u64>,
}

impl Fetched {
    /// Nothing available.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single message.
    #[must_use]
    pub fn single(message: RawMessage) -> Self {
        Self {
            messages: vec![message],
            next_cursor: None,
        }
    }
}

/// Reply to `ack` / `nack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReceipt {
    /// Whether the service accepted the acknowledgement.
    pub success: bool,
}

/// Options attached to a publish.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Priority 0-9 (queues and topics).
    pub priority: Option<u8>,
    /// Redelivery budget before dead-lettering (queues).
    pub max_retries: Option<u32>,
    /// Event name (streams).
    pub name: Option<String>,
    /// Free-form metadata.
    pub headers: HashMap<String, String>,
}

impl PublishOptions {
    /// Sets the priority, clamped to 0-9.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority.min(9));
        self
    }

    /// Sets the redelivery budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the event name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Reply to `publish`. Which fields are set depends on the resource kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Message id (queues).
    pub id: Option<String>,
    /// Offset of the appended event (streams).
    pub offset: Option<u64>,
    /// Number of subscribers reached (topics).
    pub delivered: Option<usize>,
}

/// Queue statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Messages waiting to be consumed.
    pub depth: usize,
    /// Known consumers.
    pub consumers: usize,
    /// Messages published.
    pub published: u64,
    /// Messages handed out.
    pub consumed: u64,
    /// Messages acknowledged.
    pub acked: u64,
    /// Messages negatively acknowledged.
    pub nacked: u64,
    /// Messages moved to the dead letter queue.
    pub dead_lettered: u64,
}

/// Stream room statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamStats {
    /// Room name.
    pub name: String,
    /// Events currently retained.
    pub message_count: usize,
    /// Oldest retained offset.
    pub min_offset: u64,
    /// Latest offset.
    pub max_offset: u64,
    /// Active subscribers.
    pub subscriber_count: usize,
    /// Events published, all time.
    pub total_published: u64,
    /// Events consumed, all time.
    pub total_consumed: u64,
}

/// Pub/sub statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicStats {
    /// Known topics.
    pub total_topics: usize,
    /// Known subscribers.
    pub total_subscribers: usize,
    /// Wildcard subscriptions.
    pub total_wildcard_subscriptions: usize,
    /// Messages published.
    pub messages_published: u64,
    /// Messages delivered to subscribers.
    pub messages_delivered: u64,
}

/// Resource specific statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceStats {
    /// Queue statistics.
    Queue(QueueStats),
    /// Stream statistics.
    Stream(StreamStats),
    /// Pub/sub statistics.
    Topic(TopicStats),
}

/// The narrow command surface of the remote messaging service.
///
/// Every call is a suspension point and may fail with
/// [`Error::Network`](crate::Error::Network), [`Error::Timeout`](crate::Error::Timeout)
/// or [`Error::Server`](crate::Error::Server). Implementations must not retry
/// acknowledgements on their own.
#[async_trait]
pub trait RemoteChannel
where
    Self: Send + Sync + 'static,
{
    /// Fetches up to `limit` messages for `consumer_id`, starting at `cursor`
    /// for streams.
    async fn consume(
        &self,
        resource: &Resource,
        consumer_id: &str,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<Fetched>;

    /// Positively acknowledges a message.
    async fn ack(&self, resource: &Resource, message_id: &str) -> Result<AckReceipt>;

    /// Negatively acknowledges a message, optionally requeueing it.
    async fn nack(&self, resource: &Resource, message_id: &str, requeue: bool)
    -> Result<AckReceipt>;

    /// Publishes raw bytes.
    async fn publish(
        &self,
        resource: &Resource,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishReceipt>;

    /// Fetches statistics for a resource.
    async fn stats(&self, resource: &Resource) -> Result<ResourceStats>;

    /// Called once when a consumer stops, so the channel can drop any state it
    /// keeps for that consumer.
    async fn release(&self, _resource: &Resource, _consumer_id: &str) {}
}

impl fmt::Debug for dyn RemoteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RemoteChannel")
    }
}
