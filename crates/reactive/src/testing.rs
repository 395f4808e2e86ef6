//! Scripted channel for unit tests.

use crate::channel::{
    AckReceipt, Fetched, PublishOptions, PublishReceipt, RawMessage, RemoteChannel, Resource,
    ResourceStats,
};
use crate::error::{Error, Result};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

/// Replays scripted `consume` and `stats` results and records everything else.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    fetches: Mutex<VecDeque<Result<Fetched>>>,
    stats: Mutex<VecDeque<Result<ResourceStats>>>,
    consume_delay: Mutex<Duration>,
    reject_acks: AtomicBool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub consumes: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub cursors: Mutex<Vec<Option<u64>>>,
    pub acks: Mutex<Vec<String>>,
    pub nacks: Mutex<Vec<(String, bool)>>,
    pub published: Mutex<Vec<(Resource, Bytes, PublishOptions)>>,
    pub released: Mutex<Vec<(Resource, String)>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, fetched: Result<Fetched>) {
        self.fetches.lock().push_back(fetched);
    }

    pub fn push_message(&self, id: &str, payload: &[u8]) {
        self.push_fetch(Ok(Fetched::single(message(id, payload))));
    }

    pub fn push_stats(&self, stats: Result<ResourceStats>) {
        self.stats.lock().push_back(stats);
    }

    pub fn set_consume_delay(&self, delay: Duration) {
        *self.consume_delay.lock() = delay;
    }

    pub fn reject_acks(&self) {
        self.reject_acks.store(true, Ordering::SeqCst);
    }

    pub fn acked(&self) -> Vec<String> {
        self.acks.lock().clone()
    }

    pub fn nacked(&self) -> Vec<(String, bool)> {
        self.nacks.lock().clone()
    }

    fn receipt(&self) -> AckReceipt {
        AckReceipt {
            success: !self.reject_acks.load(Ordering::SeqCst),
        }
    }
}

pub fn message(id: &str, payload: &[u8]) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        payload: Bytes::copy_from_slice(payload),
        ..RawMessage::default()
    }
}

#[async_trait]
impl RemoteChannel for ScriptedChannel {
    async fn consume(
        &self,
        _resource: &Resource,
        _consumer_id: &str,
        cursor: Option<u64>,
        _limit: usize,
    ) -> Result<Fetched> {
        self.consumes.fetch_add(1, Ordering::SeqCst);
        self.cursors.lock().push(cursor);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.consume_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fetches
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Fetched::empty()))
    }

    async fn ack(&self, _resource: &Resource, message_id: &str) -> Result<AckReceipt> {
        self.acks.lock().push(message_id.to_string());
        Ok(self.receipt())
    }

    async fn nack(
        &self,
        _resource: &Resource,
        message_id: &str,
        requeue: bool,
    ) -> Result<AckReceipt> {
        self.nacks.lock().push((message_id.to_string(), requeue));
        Ok(self.receipt())
    }

    async fn publish(
        &self,
        resource: &Resource,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishReceipt> {
        let mut published = self.published.lock();
        published.push((resource.clone(), payload, options));

        Ok(PublishReceipt {
            id: Some(format!("msg-{}", published.len())),
            ..PublishReceipt::default()
        })
    }

    async fn stats(&self, _resource: &Resource) -> Result<ResourceStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.stats
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Network("no scripted stats".into())))
    }

    async fn release(&self, resource: &Resource, consumer_id: &str) {
        self.released
            .lock()
            .push((resource.clone(), consumer_id.to_string()));
    }
}
