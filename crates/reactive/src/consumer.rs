use crate::channel::{RemoteChannel, Resource, ResourceKind};
use crate::config::ConsumerOptions;
use crate::decoder::Decoder;
use crate::dispatcher::{Cursor, Dispatcher};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::filter::EventFilter;
use crate::registry::{ConsumerKey, LifecycleRegistry, Registration};

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::TaskTracker;

/// What to consume and how.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerRegistration {
    /// Resource to consume.
    pub resource: Resource,
    /// Consumer (or subscriber) id.
    pub consumer_id: String,
    /// Polling options.
    pub options: ConsumerOptions,
}

impl ConsumerRegistration {
    /// Creates a registration.
    pub fn new(resource: Resource, consumer_id: impl Into<String>, options: ConsumerOptions) -> Self {
        Self {
            resource,
            consumer_id: consumer_id.into(),
            options,
        }
    }

    /// The registry key of this registration.
    #[must_use]
    pub fn key(&self) -> ConsumerKey {
        ConsumerKey::new(self.resource.clone(), self.consumer_id.clone())
    }
}

/// Control handle of a running consumer. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ConsumerHandle {
    registration: Registration,
    registry: Arc<LifecycleRegistry>,
    cursor: Option<Arc<Cursor>>,
    units: TaskTracker,
}

impl ConsumerHandle {
    /// The registry key of the consumer.
    #[must_use]
    pub const fn key(&self) -> &ConsumerKey {
        &self.registration.key
    }

    /// Stops polling. Fetches already started run to completion and their
    /// envelopes are still delivered. Calling this more than once is harmless.
    pub fn stop(&self) {
        self.registration.token.cancel();
        self.registry.release(&self.registration);
    }

    /// Whether the consumer is still polling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.registration.token.is_cancelled()
    }

    /// Next offset to be fetched (streams only). Callers that need to resume
    /// after a restart should checkpoint this value themselves.
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.cursor.as_ref().map(|cursor| cursor.get())
    }

    /// Waits until the consumer was stopped and every in-flight fetch has
    /// finished.
    pub async fn stopped(&self) {
        self.registration.token.cancelled().await;
        self.units.wait().await;
    }
}

/// A running consumer, as a stream of envelopes.
///
/// The stream ends once the consumer is stopped and everything already
/// fetched has been delivered. Dropping the subscription stops the consumer.
#[derive(Debug)]
pub struct Subscription<T> {
    envelopes: ReceiverStream<Envelope<T>>,
    filter: EventFilter<T>,
    handle: ConsumerHandle,
}

impl<T> Subscription<T> {
    /// Only yields envelopes matching `filter`. Others are dropped unsettled,
    /// which frees their slot.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter<T>) -> Self {
        self.filter = filter;
        self
    }

    /// The control handle.
    #[must_use]
    pub const fn handle(&self) -> &ConsumerHandle {
        &self.handle
    }

    /// See [`ConsumerHandle::stop`].
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// See [`ConsumerHandle::is_active`].
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// See [`ConsumerHandle::cursor`].
    #[must_use]
    pub fn cursor(&self) -> Option<u64> {
        self.handle.cursor()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Envelope<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match ready!(Pin::new(&mut this.envelopes).poll_next(cx)) {
                Some(envelope) if this.filter.matches(&envelope) => {
                    return Poll::Ready(Some(envelope));
                }
                Some(_) => {}
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Registers a consumer and spawns its dispatcher.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Config`](crate::Error::Config) if the options are invalid.
pub fn start<T>(
    channel: Arc<dyn RemoteChannel>,
    registry: &Arc<LifecycleRegistry>,
    consumer: ConsumerRegistration,
    decoder: Arc<dyn Decoder<T>>,
) -> Result<Subscription<T>>
where
    T: Send + 'static,
{
    consumer.options.validate()?;

    let registration = registry.register(consumer.key());
    let cursor = match consumer.resource.kind {
        ResourceKind::Stream => Some(Arc::new(Cursor::new(consumer.options.cursor.unwrap_or(0)))),
        ResourceKind::Queue | ResourceKind::Topic => None,
    };
    let (sender, receiver) = mpsc::channel(consumer.options.concurrency);
    let units = TaskTracker::new();

    Dispatcher::new(
        channel,
        Arc::clone(registry),
        registration.clone(),
        &consumer,
        decoder,
        cursor.clone(),
        sender,
        units.clone(),
    )
    .spawn();

    Ok(Subscription {
        envelopes: ReceiverStream::new(receiver),
        filter: EventFilter::All,
        handle: ConsumerHandle {
            registration,
            registry: Arc::clone(registry),
            cursor,
            units,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::{Fetched, RawMessage};
    use crate::decoder::{JsonDecoder, Payload, RawDecoder};
    use crate::error::Error;
    use crate::testing::{ScriptedChannel, message};

    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;
    use serde::Deserialize;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Task {
        task: String,
    }

    fn setup_consumer<T: Send + 'static>(
        channel: &Arc<ScriptedChannel>,
        resource: Resource,
        options: ConsumerOptions,
        decoder: Arc<dyn Decoder<T>>,
    ) -> (Arc<LifecycleRegistry>, Subscription<T>) {
        let registry = Arc::new(LifecycleRegistry::new());
        let subscription = start(
            Arc::clone(channel) as Arc<dyn RemoteChannel>,
            &registry,
            ConsumerRegistration::new(resource, "worker-1", options),
            decoder,
        )
        .unwrap();

        (registry, subscription)
    }

    fn fast() -> ConsumerOptions {
        ConsumerOptions::default().with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_delivers_and_acks() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", b"hello");

        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), fast(), Arc::new(RawDecoder));

        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(envelope.id(), "m1");
        assert_eq!(
            envelope.payload().bytes(),
            Some(&Bytes::from_static(b"hello"))
        );

        envelope.ack().await.unwrap();
        assert_eq!(channel.acked(), vec!["m1".to_string()]);
        assert!(channel.nacked().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.set_consume_delay(Duration::from_millis(20));
        for i in 0..8 {
            channel.push_message(&format!("m{i}"), b"{}");
        }

        let options = fast().with_concurrency(2);
        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), options, Arc::new(RawDecoder));

        for _ in 0..8 {
            let envelope = timeout(Duration::from_secs(2), subscription.next())
                .await
                .unwrap()
                .unwrap();
            envelope.ack().await.unwrap();
        }

        assert!(channel.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(channel.acked().len(), 8);
    }

    #[tokio::test]
    async fn test_unsettled_envelope_holds_its_slot() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", b"a");
        channel.push_message("m2", b"b");

        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), fast(), Arc::new(RawDecoder));

        let first = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.consumes.load(Ordering::SeqCst), 1);

        first.ack().await.unwrap();
        let second = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id(), "m2");
    }

    #[tokio::test]
    async fn test_no_fetch_after_stop() {
        let channel = Arc::new(ScriptedChannel::new());

        let (registry, subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), fast(), Arc::new(RawDecoder));

        sleep(Duration::from_millis(30)).await;
        subscription.stop();
        subscription.stop();
        timeout(Duration::from_secs(1), subscription.handle().stopped())
            .await
            .unwrap();

        let after_stop = channel.consumes.load(Ordering::SeqCst);
        sleep(Duration::from_millis(50)).await;

        assert_eq!(channel.consumes.load(Ordering::SeqCst), after_stop);
        assert!(!subscription.is_active());
        assert!(registry.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_fetch_completes_after_stop() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.set_consume_delay(Duration::from_millis(100));
        channel.push_message("slow", b"late");

        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), fast(), Arc::new(RawDecoder));

        while channel.consumes.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(1)).await;
        }
        subscription.stop();

        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.id(), "slow");

        envelope.ack().await.unwrap();
        assert_eq!(channel.acked(), vec!["slow".to_string()]);

        assert!(
            timeout(Duration::from_secs(1), subscription.next())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_consumer() {
        let channel = Arc::new(ScriptedChannel::new());

        let (registry, subscription) =
            setup_consumer::<()>(&channel, Resource::topic("news"), fast(), Arc::new(RawDecoder));
        let handle = subscription.handle().clone();

        drop(subscription);
        timeout(Duration::from_secs(1), handle.stopped())
            .await
            .unwrap();

        // release runs right after the last unit finishes
        sleep(Duration::from_millis(20)).await;
        assert!(registry.active_keys().is_empty());
        assert_eq!(
            channel.released.lock().clone(),
            vec![(Resource::topic("news"), "worker-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_auto_ack_settles_before_delivery() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", b"x");

        let options = fast().with_auto_ack(true);
        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), options, Arc::new(RawDecoder));

        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        assert!(envelope.is_settled());
        assert_eq!(channel.acked(), vec!["m1".to_string()]);

        envelope.nack().await.unwrap();
        assert!(channel.nacked().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_undecodable_message_is_dead_lettered() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("bad", b"not json");
        channel.push_message("good", br#"{"task":"x"}"#);

        let (_registry, mut subscription) = setup_consumer::<Task>(
            &channel,
            Resource::queue("tasks"),
            fast(),
            Arc::new(JsonDecoder::strict()),
        );

        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(envelope.id(), "good");
        assert_eq!(
            envelope.payload(),
            &Payload::Decoded(Task {
                task: "x".to_string()
            })
        );
        assert_eq!(channel.nacked(), vec![("bad".to_string(), false)]);
        assert!(logs_contain("undecodable message"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_fetch_errors_do_not_stop_polling() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_fetch(Err(Error::Network("connection refused".into())));
        channel.push_fetch(Err(Error::Timeout(Duration::from_secs(30))));
        channel.push_message("m1", b"ok");

        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::queue("tasks"), fast(), Arc::new(RawDecoder));

        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(envelope.id(), "m1");
        assert!(logs_contain("fetch failed"));
    }

    #[tokio::test]
    async fn test_stream_cursor_advances_after_batch() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_fetch(Ok(Fetched {
            messages: (0..3)
                .map(|offset| RawMessage {
                    offset: Some(offset),
                    ..message(&format!("e{offset}"), b"{}")
                })
                .collect(),
            next_cursor: None,
        }));

        let (_registry, mut subscription) =
            setup_consumer::<()>(&channel, Resource::stream("chat"), fast(), Arc::new(RawDecoder));

        let offsets: Vec<Option<u64>> = timeout(
            Duration::from_secs(1),
            subscription.by_ref().take(3).map(|e| e.raw().offset).collect(),
        )
        .await
        .unwrap();

        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(subscription.cursor(), Some(3));

        sleep(Duration::from_millis(30)).await;
        let cursors = channel.cursors.lock().clone();
        assert_eq!(cursors.first(), Some(&Some(0)));
        assert_eq!(cursors.last(), Some(&Some(3)));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let channel = Arc::new(ScriptedChannel::new());
        let registry = Arc::new(LifecycleRegistry::new());

        let result = start::<()>(
            channel as Arc<dyn RemoteChannel>,
            &registry,
            ConsumerRegistration::new(
                Resource::queue("tasks"),
                "worker-1",
                ConsumerOptions::default().with_concurrency(0),
            ),
            Arc::new(RawDecoder),
        );

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(registry.active_keys().is_empty());
    }
}
