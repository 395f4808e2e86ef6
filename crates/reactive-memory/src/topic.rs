use crate::error::Error;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use synap_reactive::{RawMessage, TopicStats};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Exact(String),
    /// `*`: exactly one level
    Single,
    /// `#`: zero or more trailing levels
    Multi,
}

/// A dot-separated topic pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub(crate) fn parse(pattern: &str) -> Result<Self, Error> {
        let segments: Vec<Segment> = pattern
            .split('.')
            .map(|segment| match segment {
                "*" => Segment::Single,
                "#" => Segment::Multi,
                exact => Segment::Exact(exact.to_string()),
            })
            .collect();

        let multi = segments.iter().filter(|s| **s == Segment::Multi).count();
        if multi > 1 {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "only one `#` is allowed",
            });
        }
        if multi == 1 && segments.last() != Some(&Segment::Multi) {
            return Err(Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "`#` must be the last segment",
            });
        }

        Ok(Self { segments })
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, Segment::Exact(_)))
    }

    pub(crate) fn matches(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('.').collect();
        let mut level = 0;

        for segment in &self.segments {
            match segment {
                Segment::Exact(expected) => {
                    if levels.get(level) != Some(&expected.as_str()) {
                        return false;
                    }
                    level += 1;
                }
                Segment::Single => {
                    if level >= levels.len() {
                        return false;
                    }
                    level += 1;
                }
                Segment::Multi => return true,
            }
        }

        level == levels.len()
    }
}

#[derive(Debug)]
struct Inbox {
    pattern: TopicPattern,
    messages: VecDeque<RawMessage>,
}

/// Pub/sub topics with one inbox per `(pattern, subscriber)`.
///
/// Publishing copies the message into every matching inbox; a subscriber
/// only sees messages published after its inbox was created.
#[derive(Debug)]
pub(crate) struct Topics {
    inboxes: HashMap<(String, String), Inbox>,
    inbox_capacity: usize,
    known_topics: HashSet<String>,
    stats: TopicStats,
}

impl Topics {
    pub(crate) fn new(inbox_capacity: usize) -> Self {
        Self {
            inboxes: HashMap::new(),
            inbox_capacity,
            known_topics: HashSet::new(),
            stats: TopicStats::default(),
        }
    }

    pub(crate) fn subscribe(&mut self, pattern: &str, subscriber_id: &str) -> Result<(), Error> {
        let key = (pattern.to_string(), subscriber_id.to_string());
        if self.inboxes.contains_key(&key) {
            return Ok(());
        }

        let compiled = TopicPattern::parse(pattern)?;
        if !compiled.is_wildcard() {
            self.known_topics.insert(pattern.to_string());
        }
        self.inboxes.insert(
            key,
            Inbox {
                pattern: compiled,
                messages: VecDeque::new(),
            },
        );
        self.refresh_stats();

        Ok(())
    }

    pub(crate) fn unsubscribe(&mut self, pattern: &str, subscriber_id: &str) -> bool {
        let removed = self
            .inboxes
            .remove(&(pattern.to_string(), subscriber_id.to_string()))
            .is_some();
        self.refresh_stats();
        removed
    }

    pub(crate) fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        priority: Option<u8>,
        headers: HashMap<String, String>,
        timestamp: u64,
    ) -> usize {
        let message = RawMessage {
            id: Uuid::new_v4().to_string(),
            payload,
            priority,
            timestamp: Some(timestamp),
            name: Some(topic.to_string()),
            headers,
            ..RawMessage::default()
        };

        let mut delivered = 0;
        for inbox in self.inboxes.values_mut() {
            if inbox.pattern.matches(topic) {
                inbox.messages.push_back(message.clone());
                while inbox.messages.len() > self.inbox_capacity {
                    inbox.messages.pop_front();
                }
                delivered += 1;
            }
        }

        self.known_topics.insert(topic.to_string());
        self.stats.messages_published += 1;
        self.stats.messages_delivered += delivered as u64;
        self.refresh_stats();

        delivered
    }

    /// Takes up to `limit` messages from a subscriber's inbox, creating the
    /// inbox on first use.
    pub(crate) fn drain(&mut self, pattern: &str, subscriber_id: &str, limit: usize) -> Result<Vec<RawMessage>, Error> {
        self.subscribe(pattern, subscriber_id)?;

        let Some(inbox) = self
            .inboxes
            .get_mut(&(pattern.to_string(), subscriber_id.to_string()))
        else {
            return Ok(Vec::new());
        };

        let take = limit.min(inbox.messages.len());
        Ok(inbox.messages.drain(..take).collect())
    }

    pub(crate) fn stats(&self) -> TopicStats {
        self.stats.clone()
    }

    fn refresh_stats(&mut self) {
        self.stats.total_topics = self.known_topics.len();
        self.stats.total_subscribers = self.inboxes.len();
        self.stats.total_wildcard_subscriptions = self
            .inboxes
            .values()
            .filter(|inbox| inbox.pattern.is_wildcard())
            .count();
    }
}
