//! Handler-driven processing with automatic acknowledgement.
//!
//! [`process`] takes any stream of envelopes and runs a [`MessageHandler`] on
//! each one, at most `concurrency` at a time. A handler that returns `Ok` gets
//! its message acked; one that fails (or panics) gets it nacked. Every message
//! produces exactly one [`ProcessOutcome`] and the outcome stream itself never
//! fails.

use crate::channel::RawMessage;
use crate::consumer::{ConsumerHandle, Subscription};
use crate::decoder::Payload;
use crate::envelope::Envelope;
use crate::error::{BoxError, Error};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{error, warn};

/// Processes one message.
#[async_trait]
pub trait MessageHandler<T>
where
    Self: Send + Sync + 'static,
{
    /// Handles a decoded payload. Returning an error nacks the message.
    async fn handle(&self, payload: Payload<T>, raw: RawMessage) -> Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Payload<T>, RawMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, payload: Payload<T>, raw: RawMessage) -> Result<(), BoxError> {
        self(payload, raw).await
    }
}

/// Result of processing one message.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The processed message.
    pub message_id: String,
    /// Whether the handler succeeded and the ack went through.
    pub success: bool,
    /// [`Error::Handler`] when the handler failed, or the acknowledgement
    /// error when the handler succeeded but the ack did not.
    pub error: Option<Error>,
}

impl ProcessOutcome {
    const fn succeeded(message_id: String) -> Self {
        Self {
            message_id,
            success: true,
            error: None,
        }
    }

    const fn failed(message_id: String, error: Error) -> Self {
        Self {
            message_id,
            success: false,
            error: Some(error),
        }
    }
}

/// Runs `handler` over every envelope of `envelopes`, at most `concurrency`
/// at a time, settling each message according to the handler result.
pub fn process<T, S, H>(
    envelopes: S,
    concurrency: usize,
    handler: H,
) -> impl Stream<Item = ProcessOutcome> + Send
where
    T: Send + 'static,
    S: Stream<Item = Envelope<T>> + Send + 'static,
    H: MessageHandler<T>,
{
    let handler = Arc::new(handler);

    envelopes
        .map(move |envelope| {
            let handler = Arc::clone(&handler);
            async move { settle(handler.as_ref(), envelope).await }
        })
        .buffer_unordered(concurrency.max(1))
}

/// A consumer whose messages are settled by a handler, as a stream of
/// [`ProcessOutcome`]s.
///
/// The outcome stream must be polled for processing to make progress.
pub struct Processing {
    outcomes: BoxStream<'static, ProcessOutcome>,
    handle: ConsumerHandle,
}

impl Processing {
    /// Runs `handler` over `subscription` with up to `concurrency` handlers
    /// in flight.
    pub fn new<T, H>(subscription: Subscription<T>, concurrency: usize, handler: H) -> Self
    where
        T: Send + 'static,
        H: MessageHandler<T>,
    {
        let handle = subscription.handle().clone();

        Self {
            outcomes: process(subscription, concurrency, handler).boxed(),
            handle,
        }
    }

    /// The control handle of the underlying consumer.
    #[must_use]
    pub const fn handle(&self) -> &ConsumerHandle {
        &self.handle
    }

    /// Stops the underlying consumer. Messages already fetched are still
    /// processed.
    pub fn stop(&self) {
        self.handle.stop();
    }
}

impl Stream for Processing {
    type Item = ProcessOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.outcomes.poll_next_unpin(cx)
    }
}

impl fmt::Debug for Processing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processing")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

async fn settle<T, H>(handler: &H, envelope: Envelope<T>) -> ProcessOutcome
where
    T: Send + 'static,
    H: MessageHandler<T>,
{
    let (raw, payload, handle) = envelope.into_parts();
    let message_id = raw.id.clone();

    let result = AssertUnwindSafe(handler.handle(payload, raw))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panic_message(panic.as_ref()).into()));

    match result {
        Ok(()) => match handle.ack().await {
            Ok(()) => ProcessOutcome::succeeded(message_id),
            Err(ack_error) => {
                error!(%message_id, error = %ack_error, "failed to ack processed message");
                ProcessOutcome::failed(message_id, ack_error)
            }
        },
        Err(handler_error) => {
            warn!(%message_id, error = %handler_error, "handler failed, nacking message");
            if let Err(nack_error) = handle.nack().await {
                error!(%message_id, error = %nack_error, "failed to nack message");
            }
            ProcessOutcome::failed(message_id, Error::Handler(handler_error))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(
            || "handler panicked".to_string(),
            |message| format!("handler panicked: {message}"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channel::{RemoteChannel, Resource};
    use crate::config::ConsumerOptions;
    use crate::consumer::{ConsumerRegistration, start};
    use crate::decoder::{JsonDecoder, RawDecoder};
    use crate::registry::LifecycleRegistry;
    use crate::testing::ScriptedChannel;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::Deserialize;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    #[derive(Debug, Deserialize)]
    struct Task {
        task: String,
    }

    fn setup_queue<T: Send + 'static>(
        channel: &Arc<ScriptedChannel>,
        decoder: Arc<dyn crate::decoder::Decoder<T>>,
    ) -> crate::consumer::Subscription<T> {
        let registry = Arc::new(LifecycleRegistry::new());
        start(
            Arc::clone(channel) as Arc<dyn RemoteChannel>,
            &registry,
            ConsumerRegistration::new(
                Resource::queue("tasks"),
                "worker-1",
                ConsumerOptions::default().with_poll_interval(Duration::from_millis(5)),
            ),
            decoder,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_acks_exactly_once() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", br#"{"task":"x"}"#);

        let subscription = setup_queue::<Task>(&channel, Arc::new(JsonDecoder::strict()));
        let outcomes = process(subscription, 1, |payload: Payload<Task>, _raw: RawMessage| async move {
            assert_eq!(payload.into_decoded().unwrap().task, "x");
            Ok::<(), BoxError>(())
        });
        tokio::pin!(outcomes);

        let outcome = timeout(Duration::from_secs(1), outcomes.next())
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(channel.acked(), vec!["m1".to_string()]);
        assert!(channel.nacked().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_nacks_exactly_once() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", b"payload");

        let subscription = setup_queue::<()>(&channel, Arc::new(RawDecoder));
        let outcomes = process(subscription, 1, |_payload: Payload<()>, _raw: RawMessage| async move {
            Err::<(), BoxError>("boom".into())
        });
        tokio::pin!(outcomes);

        let outcome = timeout(Duration::from_secs(1), outcomes.next())
            .await
            .unwrap()
            .unwrap();

        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(Error::Handler(_))));
        assert_eq!(channel.nacked(), vec![("m1".to_string(), true)]);
        assert!(channel.acked().is_empty());
        assert!(logs_contain("handler failed"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.push_message("m1", b"a");
        channel.push_message("m2", b"b");

        let subscription = setup_queue::<()>(&channel, Arc::new(RawDecoder));
        let outcomes = process(subscription, 1, |_payload: Payload<()>, raw: RawMessage| async move {
            assert_ne!(raw.id, "m1", "first message explodes");
            Ok::<(), BoxError>(())
        });
        tokio::pin!(outcomes);

        let first = timeout(Duration::from_secs(1), outcomes.next())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_secs(1), outcomes.next())
            .await
            .unwrap()
            .unwrap();

        assert!(!first.success);
        assert!(second.success);
        assert_eq!(channel.nacked(), vec![("m1".to_string(), true)]);
        assert_eq!(channel.acked(), vec!["m2".to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_ack_is_reported() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.reject_acks();
        channel.push_message("m1", b"a");

        let subscription = setup_queue::<()>(&channel, Arc::new(RawDecoder));
        let outcomes = process(subscription, 1, |_payload: Payload<()>, _raw: RawMessage| async move {
            Ok::<(), BoxError>(())
        });
        tokio::pin!(outcomes);

        let outcome = timeout(Duration::from_secs(1), outcomes.next())
            .await
            .unwrap()
            .unwrap();

        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(Error::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_handler_concurrency_is_bounded() {
        let channel = Arc::new(ScriptedChannel::new());
        for i in 0..6 {
            channel.push_message(&format!("m{i}"), b"x");
        }

        struct Counting {
            running: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl MessageHandler<()> for Counting {
            async fn handle(&self, _payload: Payload<()>, _raw: RawMessage) -> Result<(), BoxError> {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let peak = Arc::new(AtomicUsize::new(0));
        let counting = Counting {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        };

        let registry = Arc::new(LifecycleRegistry::new());
        let subscription = start::<()>(
            Arc::clone(&channel) as Arc<dyn RemoteChannel>,
            &registry,
            ConsumerRegistration::new(
                Resource::queue("tasks"),
                "worker-1",
                ConsumerOptions::default()
                    .with_poll_interval(Duration::from_millis(1))
                    .with_concurrency(4),
            ),
            Arc::new(RawDecoder),
        )
        .unwrap();

        let outcomes = process(subscription, 2, counting);
        let outcomes: Vec<ProcessOutcome> = timeout(Duration::from_secs(2), outcomes.take(6).collect())
            .await
            .unwrap();

        assert!(outcomes.iter().all(|outcome| outcome.success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
