use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use synap_reactive::{RawMessage, StreamStats};
use uuid::Uuid;

/// An append-only event log with sequential offsets starting at 0.
///
/// Only the newest `capacity` events are retained; older offsets silently
/// disappear from reads.
#[derive(Debug)]
pub(crate) struct Room {
    events: VecDeque<RawMessage>,
    capacity: usize,
    next_offset: u64,
    subscribers: HashSet<String>,
    stats: StreamStats,
}

impl Room {
    pub(crate) fn new(name: &str, capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            next_offset: 0,
            subscribers: HashSet::new(),
            stats: StreamStats {
                name: name.to_string(),
                ..StreamStats::default()
            },
        }
    }

    pub(crate) fn publish(
        &mut self,
        event: String,
        data: Bytes,
        headers: HashMap<String, String>,
    ) -> u64 {
        let offset = self.next_offset;
        self.next_offset += 1;

        self.events.push_back(RawMessage {
            id: Uuid::new_v4().to_string(),
            payload: data,
            offset: Some(offset),
            timestamp: Some(unix_now()),
            name: Some(event),
            headers,
            ..RawMessage::default()
        });

        while self.events.len() > self.capacity {
            self.events.pop_front();
        }

        self.stats.total_published += 1;
        self.stats.max_offset = offset;
        self.stats.min_offset = self
            .events
            .front()
            .and_then(|event| event.offset)
            .unwrap_or(offset);
        self.stats.message_count = self.events.len();

        offset
    }

    /// Events at or after `from`, oldest first, and the offset to read next.
    pub(crate) fn read(&mut self, subscriber_id: &str, from: u64, limit: usize) -> (Vec<RawMessage>, u64) {
        let events: Vec<RawMessage> = self
            .events
            .iter()
            .filter(|event| event.offset.is_some_and(|offset| offset >= from))
            .take(limit)
            .cloned()
            .collect();

        let next = events
            .last()
            .and_then(|event| event.offset)
            .map_or(from, |offset| offset.saturating_add(1));

        self.subscribers.insert(subscriber_id.to_string());
        self.stats.subscriber_count = self.subscribers.len();
        self.stats.total_consumed += events.len() as u64;

        (events, next)
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.stats.clone()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}
