use crate::ack::{AckHandle, Slot};
use crate::channel::{Fetched, RawMessage, RemoteChannel, ResourceKind};
use crate::config::ConsumerOptions;
use crate::consumer::ConsumerRegistration;
use crate::decoder::Decoder;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::registry::{LifecycleRegistry, Registration};
use crate::scheduler::schedule;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span, trace, warn};

/// Client-side read position of a stream consumer.
///
/// Fetches are serialized through `fetch_lock` so two units never read the
/// same offsets; processing of fetched events stays concurrent.
#[derive(Debug)]
pub(crate) struct Cursor {
    position: AtomicU64,
    fetch_lock: Mutex<()>,
}

impl Cursor {
    pub(crate) const fn new(start: u64) -> Self {
        Self {
            position: AtomicU64::new(start),
            fetch_lock: Mutex::const_new(()),
        }
    }

    pub(crate) fn get(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    fn advance(&self, fetched: &Fetched) {
        let mut next = self.get();

        if let Some(offset) = fetched.messages.iter().filter_map(|m| m.offset).max() {
            next = next.max(offset.saturating_add(1));
        }
        if let Some(reported) = fetched.next_cursor {
            next = next.max(reported);
        }

        self.position.fetch_max(next, Ordering::AcqRel);
    }
}

/// Drives one consumer: ticks, fetches under the concurrency bound, decodes
/// and hands envelopes to the subscription.
pub(crate) struct Dispatcher<T> {
    channel: Arc<dyn RemoteChannel>,
    registry: Arc<LifecycleRegistry>,
    registration: Registration,
    options: ConsumerOptions,
    decoder: Arc<dyn Decoder<T>>,
    cursor: Option<Arc<Cursor>>,
    sender: mpsc::Sender<Envelope<T>>,
    units: TaskTracker,
}

impl<T> Dispatcher<T>
where
    T: Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: Arc<dyn RemoteChannel>,
        registry: Arc<LifecycleRegistry>,
        registration: Registration,
        consumer: &ConsumerRegistration,
        decoder: Arc<dyn Decoder<T>>,
        cursor: Option<Arc<Cursor>>,
        sender: mpsc::Sender<Envelope<T>>,
        units: TaskTracker,
    ) -> Self {
        Self {
            channel,
            registry,
            registration,
            options: consumer.options.clone(),
            decoder,
            cursor,
            sender,
            units,
        }
    }

    /// Spawns the dispatcher loop.
    pub(crate) fn spawn(self) {
        let span = debug_span!(
            "consumer",
            resource = %self.registration.key.resource,
            consumer_id = %self.registration.key.consumer_id,
        );

        tokio::spawn(Arc::new(self).run().instrument(span));
    }

    async fn run(self: Arc<Self>) {
        let token = self.registration.token.clone();
        let slots = Arc::new(Semaphore::new(self.options.concurrency));
        let ticks = schedule(self.options.poll_interval, token.clone());
        tokio::pin!(ticks);

        debug!("consumer started");

        loop {
            let tick = tokio::select! {
                biased;
                () = self.sender.closed() => {
                    debug!("subscription dropped, stopping consumer");
                    token.cancel();
                    break;
                }
                tick = ticks.next() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                () = token.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if token.is_cancelled() {
                break;
            }

            trace!(tick = tick.seq, "starting fetch");
            let unit = Arc::clone(&self);
            self.units
                .spawn(async move { unit.fetch_and_deliver(Arc::new(permit)).await }.in_current_span());
        }

        self.units.close();
        self.units.wait().await;
        self.finish().await;
    }

    async fn finish(&self) {
        let key = &self.registration.key;

        self.registry.release(&self.registration);

        // A newer registration under the same key owns the channel state now.
        if !self.registry.is_active(key) {
            self.channel.release(&key.resource, &key.consumer_id).await;
        }

        debug!("consumer stopped");
    }

    async fn fetch_and_deliver(&self, slot: Slot) {
        let fetched = match self.fetch().await {
            Ok(fetched) => fetched,
            Err(error) => {
                warn!(%error, "fetch failed, will retry on next tick");
                return;
            }
        };

        for raw in fetched.messages {
            let Some(envelope) = self.prepare(raw, &slot).await else {
                continue;
            };

            if self.sender.send(envelope).await.is_err() {
                debug!("subscription dropped, stopping consumer");
                self.registration.token.cancel();
                return;
            }
        }
    }

    async fn fetch(&self) -> Result<Fetched> {
        let key = &self.registration.key;
        let limit = match key.resource.kind {
            ResourceKind::Queue => 1,
            ResourceKind::Stream | ResourceKind::Topic => self.options.batch_size,
        };

        let Some(cursor) = &self.cursor else {
            return self
                .channel
                .consume(&key.resource, &key.consumer_id, None, limit)
                .await;
        };

        let _guard = cursor.fetch_lock.lock().await;
        if self.registration.token.is_cancelled() {
            return Ok(Fetched::empty());
        }

        let fetched = self
            .channel
            .consume(&key.resource, &key.consumer_id, Some(cursor.get()), limit)
            .await?;
        cursor.advance(&fetched);

        Ok(fetched)
    }

    async fn prepare(&self, raw: RawMessage, slot: &Slot) -> Option<Envelope<T>> {
        let resource = &self.registration.key.resource;

        let payload = match self.decoder.decode(&raw.payload) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(message_id = %raw.id, %error, "undecodable message, dead-lettering");
                if let Err(error) = self.channel.nack(resource, &raw.id, false).await {
                    warn!(message_id = %raw.id, %error, "failed to dead-letter message");
                }
                return None;
            }
        };

        let handle = if self.options.auto_ack {
            match self.channel.ack(resource, &raw.id).await {
                Ok(receipt) if receipt.success => {}
                Ok(_) => warn!(message_id = %raw.id, "auto-ack rejected"),
                Err(error) => warn!(message_id = %raw.id, %error, "auto-ack failed"),
            }
            AckHandle::settled(resource.clone(), raw.id.clone(), Some(Arc::clone(slot)))
        } else {
            AckHandle::pending(
                Arc::clone(&self.channel),
                resource.clone(),
                raw.id.clone(),
                self.options.requeue_on_nack,
                Some(Arc::clone(slot)),
            )
        };

        Some(Envelope::new(raw, payload, handle))
    }
}
