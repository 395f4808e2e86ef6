use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use synap_reactive::{ConsumerOptions, EnvelopeStreamExt, ReactiveClient, ResourceStats};
use synap_reactive_memory::{MemoryChannel, Operation};
use tokio::time::{sleep, timeout};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ChatMessage {
    text: String,
}

fn setup_client() -> (Arc<MemoryChannel>, ReactiveClient) {
    let channel = Arc::new(MemoryChannel::new());
    let client = ReactiveClient::new(channel.clone());

    (channel, client)
}

fn fast_options() -> ConsumerOptions {
    ConsumerOptions::default().with_poll_interval(Duration::from_millis(10))
}

fn chat(text: &str) -> ChatMessage {
    ChatMessage { text: text.into() }
}

#[tokio::test]
async fn test_events_delivered_once_in_offset_order() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    for text in ["a", "b", "c"] {
        stream.publish("chat", "message", &chat(text)).await.unwrap();
    }

    let mut subscription = stream
        .observe_events::<ChatMessage>("chat", "reader", fast_options().from_offset(0))
        .unwrap();

    let mut offsets = Vec::new();
    let mut texts = Vec::new();
    for _ in 0..3 {
        let envelope = timeout(Duration::from_secs(1), subscription.next())
            .await
            .unwrap()
            .unwrap();
        offsets.push(envelope.raw().offset);
        texts.push(envelope.payload().decoded().map(|m| m.text.clone()));
    }

    assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
    assert_eq!(
        texts,
        vec![Some("a".to_string()), Some("b".to_string()), Some("c".to_string())]
    );

    // Several polls later nothing is redelivered.
    assert!(
        timeout(Duration::from_millis(100), subscription.next())
            .await
            .is_err()
    );
    assert_eq!(subscription.cursor(), Some(3));
}

#[tokio::test]
async fn test_events_published_later_are_picked_up() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    stream.publish("chat", "message", &chat("old")).await.unwrap();

    let mut subscription = stream
        .observe_events::<ChatMessage>("chat", "reader", fast_options().from_offset(1))
        .unwrap();
    sleep(Duration::from_millis(30)).await;
    stream.publish("chat", "message", &chat("new")).await.unwrap();

    let envelope = timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(envelope.raw().offset, Some(1));
    assert_eq!(envelope.payload().decoded(), Some(&chat("new")));
}

#[tokio::test]
async fn test_observe_event_filters_by_name() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    stream.publish("chat", "joined", &chat("alice")).await.unwrap();
    stream.publish("chat", "message", &chat("hi")).await.unwrap();
    stream.publish("chat", "joined", &chat("bob")).await.unwrap();

    let subscription = stream
        .observe_event::<ChatMessage>("chat", "reader", "joined", fast_options())
        .unwrap();

    let envelopes: Vec<_> = timeout(Duration::from_secs(1), subscription.take(2).collect::<Vec<_>>())
        .await
        .unwrap();
    let offsets: Vec<_> = envelopes.iter().map(|envelope| envelope.raw().offset).collect();

    assert_eq!(offsets, vec![Some(0), Some(2)]);
}

#[tokio::test]
async fn test_non_json_events_pass_through_as_bytes() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    stream.publish_raw("chat", "binary", &b"\x00\x01"[..]).await.unwrap();
    stream.publish("chat", "message", &chat("text")).await.unwrap();

    let subscription = stream
        .observe_events::<ChatMessage>("chat", "reader", fast_options())
        .unwrap();

    let envelopes: Vec<_> = timeout(Duration::from_secs(1), subscription.take(2).collect::<Vec<_>>())
        .await
        .unwrap();

    assert!(!envelopes[0].payload().is_decoded());
    assert_eq!(envelopes[0].payload().bytes().map(|b| b.as_ref()), Some(&b"\x00\x01"[..]));
    assert!(envelopes[1].payload().is_decoded());
}

#[tokio::test]
async fn test_stream_extension_filters_compose() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    for (event, text) in [("message", "one"), ("typing", "..."), ("message", "two")] {
        stream.publish("chat", event, &chat(text)).await.unwrap();
    }

    let texts: Vec<_> = timeout(
        Duration::from_secs(1),
        stream
            .observe_events::<ChatMessage>("chat", "reader", fast_options())
            .unwrap()
            .filter_by_event_name("message")
            .filter_by_predicate(|envelope| {
                envelope
                    .payload()
                    .decoded()
                    .is_some_and(|m| m.text != "one")
            })
            .take(1)
            .map(|envelope| envelope.payload().decoded().map(|m| m.text.clone()))
            .collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    assert_eq!(texts, vec![Some("two".to_string())]);
}

#[tokio::test]
async fn test_stop_ends_subscription_after_buffered_events() {
    let (channel, client) = setup_client();
    let stream = client.stream();
    stream.publish("chat", "message", &chat("only")).await.unwrap();

    let mut subscription = stream
        .observe_events::<ChatMessage>("chat", "reader", fast_options())
        .unwrap();
    let first = timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap();
    assert!(first.is_some());

    assert!(stream.stop("chat", "reader"));
    let rest: Vec<_> = timeout(Duration::from_secs(1), subscription.collect::<Vec<_>>())
        .await
        .unwrap();

    assert!(rest.is_empty());
    let consumes = channel.calls(Operation::Consume);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(channel.calls(Operation::Consume), consumes);
}

#[tokio::test]
async fn test_room_stats() {
    let (_channel, client) = setup_client();
    let stream = client.stream();
    for text in ["a", "b"] {
        stream.publish("chat", "message", &chat(text)).await.unwrap();
    }

    let stats = stream.stats("chat").await.unwrap();
    let snapshot = timeout(Duration::from_secs(1), Box::pin(stream.poll_stats("chat")).next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(stats.total_published, 2);
    assert_eq!(stats.max_offset, 1);
    assert_eq!(snapshot.stats, ResourceStats::Stream(stats));
}
