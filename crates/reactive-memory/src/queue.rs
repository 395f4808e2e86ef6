use crate::error::Error;

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use synap_reactive::{QueueStats, RawMessage};
use tracing::debug;
use uuid::Uuid;

/// Queue configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryQueueConfig {
    /// Maximum number of ready messages.
    pub max_depth: usize,
    /// How long a delivered message may stay unacknowledged before it is
    /// requeued.
    pub ack_deadline: Duration,
    /// Redeliveries before a message is dead-lettered, unless the publisher
    /// sets its own.
    pub default_max_retries: u32,
    /// Priority of messages published without one.
    pub default_priority: u8,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_depth: 100_000,
            ack_deadline: Duration::from_secs(30),
            default_max_retries: 3,
            default_priority: 5,
        }
    }
}

#[derive(Clone, Debug)]
struct Message {
    id: String,
    payload: Bytes,
    priority: u8,
    retry_count: u32,
    max_retries: u32,
    headers: HashMap<String, String>,
}

impl Message {
    fn to_raw(&self) -> RawMessage {
        RawMessage {
            id: self.id.clone(),
            payload: self.payload.clone(),
            priority: Some(self.priority),
            retry_count: self.retry_count,
            headers: self.headers.clone(),
            ..RawMessage::default()
        }
    }
}

#[derive(Debug)]
struct Pending {
    message: Message,
    deadline: Instant,
}

/// A priority work queue with a pending set and a dead letter queue.
///
/// Higher priorities are handed out first, FIFO within a priority. Every
/// nack counts as a retry; a message whose retry count exceeds its budget, or
/// that is nacked without requeue, moves to the dead letter queue.
#[derive(Debug)]
pub(crate) struct MemoryQueue {
    name: String,
    config: MemoryQueueConfig,
    ready: BTreeMap<(Reverse<u8>, u64), Message>,
    pending: HashMap<String, Pending>,
    dead_letter: Vec<Message>,
    consumers: HashSet<String>,
    next_seq: u64,
    stats: QueueStats,
}

impl MemoryQueue {
    pub(crate) fn new(name: &str, config: MemoryQueueConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            ready: BTreeMap::new(),
            pending: HashMap::new(),
            dead_letter: Vec::new(),
            consumers: HashSet::new(),
            next_seq: 0,
            stats: QueueStats::default(),
        }
    }

    pub(crate) fn publish(
        &mut self,
        payload: Bytes,
        priority: Option<u8>,
        max_retries: Option<u32>,
        headers: HashMap<String, String>,
    ) -> Result<String, Error> {
        if self.ready.len() >= self.config.max_depth {
            return Err(Error::QueueFull(self.name.clone()));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            payload,
            priority: priority.unwrap_or(self.config.default_priority).min(9),
            retry_count: 0,
            max_retries: max_retries.unwrap_or(self.config.default_max_retries),
            headers,
        };
        let id = message.id.clone();

        self.enqueue(message);
        self.stats.published += 1;

        Ok(id)
    }

    pub(crate) fn consume(&mut self, consumer_id: &str) -> Option<RawMessage> {
        self.expire_pending();
        self.consumers.insert(consumer_id.to_string());
        self.stats.consumers = self.consumers.len();

        let (_, message) = self.ready.pop_first()?;
        let raw = message.to_raw();

        self.pending.insert(
            message.id.clone(),
            Pending {
                message,
                deadline: Instant::now() + self.config.ack_deadline,
            },
        );
        self.stats.consumed += 1;
        self.stats.depth = self.ready.len();

        Some(raw)
    }

    /// Returns `false` if the message is not pending.
    pub(crate) fn ack(&mut self, message_id: &str) -> bool {
        if self.pending.remove(message_id).is_none() {
            return false;
        }

        self.stats.acked += 1;
        true
    }

    /// Returns `false` if the message is not pending.
    pub(crate) fn nack(&mut self, message_id: &str, requeue: bool) -> bool {
        let Some(Pending { mut message, .. }) = self.pending.remove(message_id) else {
            return false;
        };

        self.stats.nacked += 1;
        message.retry_count += 1;

        if requeue && message.retry_count <= message.max_retries {
            debug!(queue = %self.name, message_id, retry = message.retry_count, "requeueing message");
            self.enqueue(message);
        } else {
            debug!(queue = %self.name, message_id, retry = message.retry_count, "dead-lettering message");
            self.dead_letter.push(message);
            self.stats.dead_lettered += 1;
        }

        true
    }

    pub(crate) fn stats(&self) -> QueueStats {
        self.stats.clone()
    }

    pub(crate) fn dead_letters(&self) -> Vec<RawMessage> {
        self.dead_letter.iter().map(Message::to_raw).collect()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn enqueue(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.ready.insert((Reverse(message.priority), seq), message);
        self.stats.depth = self.ready.len();
    }

    fn expire_pending(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for message_id in expired {
            debug!(queue = %self.name, %message_id, "ack deadline expired");
            self.nack(&message_id, true);
        }
    }
}
