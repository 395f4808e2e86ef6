use crate::bridge::TopicBridge;
use crate::config::HttpChannelConfig;
use crate::error::{Error, Result};
use crate::wire::{
    CommandReply, CommandRequest, Empty, Published, QueueConsume, QueueConsumed, QueueName,
    QueuePublish, QueueSettle, RoomName, StreamConsume, StreamConsumed, StreamPublish,
    StreamPublished, TopicPublish, TopicPublished,
};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use synap_reactive::{
    AckReceipt, Fetched, PublishOptions, PublishReceipt, QueueStats, RawMessage, RemoteChannel,
    Resource, ResourceKind, ResourceStats, StreamStats, TopicStats,
};
use tracing::{debug, instrument};
use url::Url;

/// A [`RemoteChannel`] speaking the service's StreamableHTTP command
/// protocol.
///
/// Queues and streams are polled with `queue.consume` and `stream.consume`.
/// Topics have no pull command, so each topic subscriber gets a WebSocket
/// bridge that buffers pushed messages between polls; the bridge opens on the
/// first poll and closes when the consumer is released.
#[derive(Debug)]
pub struct HttpChannel {
    config: HttpChannelConfig,
    client: Client,
    command_url: Url,
    bridges: DashMap<(String, String), Arc<TopicBridge>>,
}

impl HttpChannel {
    /// Creates a channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::Url`] if the configuration is
    /// unusable, or [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: HttpChannelConfig) -> Result<Self> {
        if config.bridge_capacity == 0 {
            return Err(Error::Config("bridge capacity must be at least 1".into()));
        }

        let command_url = config.command_url()?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| Error::Config(format!("invalid auth token: {error}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            config,
            client,
            command_url,
            bridges: DashMap::new(),
        })
    }

    /// The configuration the channel was built with.
    #[must_use]
    pub const fn config(&self) -> &HttpChannelConfig {
        &self.config
    }

    /// Number of open topic bridges.
    #[must_use]
    pub fn open_bridges(&self) -> usize {
        self.bridges.len()
    }

    /// Sends one command and decodes its reply payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Status`] for a non-success HTTP status,
    /// [`Error::Command`] if the service reports failure, or the transport
    /// and decoding errors.
    #[instrument(level = "debug", skip(self, payload))]
    pub async fn send_command<P, R>(&self, command: &'static str, payload: P) -> Result<R>
    where
        P: Serialize + Send + std::fmt::Debug,
        R: DeserializeOwned,
    {
        let request = CommandRequest::new(command, payload);
        let response = self
            .client
            .post(self.command_url.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: CommandReply = response.json().await?;
        if !reply.success {
            return Err(Error::Command {
                command,
                message: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(serde_json::from_value(reply.payload)?)
    }

    async fn settle(&self, command: &'static str, settle: QueueSettle<'_>) -> Result<AckReceipt> {
        match self.send_command::<_, Value>(command, settle).await {
            Ok(_) => Ok(AckReceipt { success: true }),
            // Unknown or already settled message ids come back as command
            // failures.
            Err(Error::Command { message, .. }) => {
                debug!(command, %message, "settlement rejected");
                Ok(AckReceipt { success: false })
            }
            Err(error) => Err(error),
        }
    }

    async fn bridge(&self, topic: &str, subscriber_id: &str) -> Result<Arc<TopicBridge>> {
        let key = (topic.to_string(), subscriber_id.to_string());
        if let Some(bridge) = self.bridges.get(&key) {
            return Ok(Arc::clone(bridge.value()));
        }

        let url = self.config.pubsub_url(topic)?;
        let bridge = Arc::new(
            TopicBridge::connect(
                &url,
                self.config.auth_token.as_deref(),
                self.config.bridge_capacity,
            )
            .await?,
        );

        // A concurrent poll may have connected first; keep whichever landed.
        Ok(Arc::clone(self.bridges.entry(key).or_insert(bridge).value()))
    }

    fn drop_bridge(&self, topic: &str, subscriber_id: &str) {
        if let Some((_, bridge)) = self
            .bridges
            .remove(&(topic.to_string(), subscriber_id.to_string()))
        {
            bridge.close();
        }
    }

    async fn consume_topic(&self, topic: &str, subscriber_id: &str, limit: usize) -> Result<Fetched> {
        let bridge = self.bridge(topic, subscriber_id).await?;

        match bridge.drain(limit) {
            Ok(messages) => Ok(Fetched {
                messages,
                next_cursor: None,
            }),
            Err(error) => {
                // Reconnect on the next poll.
                self.drop_bridge(topic, subscriber_id);
                Err(error)
            }
        }
    }

    async fn consume_inner(
        &self,
        resource: &Resource,
        consumer_id: &str,
        cursor: Option<u64>,
        limit: usize,
    ) -> Result<Fetched> {
        match resource.kind {
            ResourceKind::Queue => {
                let reply: QueueConsumed = self
                    .send_command(
                        "queue.consume",
                        QueueConsume {
                            queue: &resource.name,
                            consumer_id,
                        },
                    )
                    .await?;

                Ok(reply
                    .message
                    .map_or_else(Fetched::empty, |message| Fetched::single(message.into())))
            }

            ResourceKind::Stream => {
                let from_offset = cursor.unwrap_or(0);
                let reply: StreamConsumed = self
                    .send_command(
                        "stream.consume",
                        StreamConsume {
                            room: &resource.name,
                            subscriber_id: consumer_id,
                            from_offset,
                            limit,
                        },
                    )
                    .await?;

                let messages: Vec<RawMessage> =
                    reply.events.into_iter().map(RawMessage::from).collect();
                let next_cursor = resume_offset(reply.next_offset, &messages, from_offset);

                Ok(Fetched {
                    messages,
                    next_cursor: Some(next_cursor),
                })
            }

            ResourceKind::Topic => self.consume_topic(&resource.name, consumer_id, limit).await,
        }
    }

    async fn publish_inner(
        &self,
        resource: &Resource,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<PublishReceipt> {
        match resource.kind {
            ResourceKind::Queue => {
                let reply: Published = self
                    .send_command(
                        "queue.publish",
                        QueuePublish {
                            queue: &resource.name,
                            payload: &payload,
                            priority: options.priority,
                            max_retries: options.max_retries,
                            headers: &options.headers,
                        },
                    )
                    .await?;

                Ok(PublishReceipt {
                    id: Some(reply.message_id),
                    ..PublishReceipt::default()
                })
            }

            ResourceKind::Stream => {
                let reply: StreamPublished = self
                    .send_command(
                        "stream.publish",
                        StreamPublish {
                            room: &resource.name,
                            event: options.name.as_deref().unwrap_or("message"),
                            data: json_body(&payload)?,
                        },
                    )
                    .await?;

                Ok(PublishReceipt {
                    offset: Some(reply.offset),
                    ..PublishReceipt::default()
                })
            }

            ResourceKind::Topic => {
                let reply: TopicPublished = self
                    .send_command(
                        "pubsub.publish",
                        TopicPublish {
                            topic: &resource.name,
                            payload: json_body(&payload)?,
                            priority: options.priority,
                            metadata: &options.headers,
                        },
                    )
                    .await?;

                Ok(PublishReceipt {
                    delivered: Some(reply.subscribers_matched),
                    ..PublishReceipt::default()
                })
            }
        }
    }

    async fn stats_inner(&self, resource: &Resource) -> Result<ResourceStats> {
        Ok(match resource.kind {
            ResourceKind::Queue => ResourceStats::Queue(
                self.send_command::<_, QueueStats>(
                    "queue.stats",
                    QueueName {
                        queue: &resource.name,
                    },
                )
                .await?,
            ),
            ResourceKind::Stream => ResourceStats::Stream(
                self.send_command::<_, StreamStats>(
                    "stream.stats",
                    RoomName {
                        room: &resource.name,
                    },
                )
                .await?,
            ),
            ResourceKind::Topic => {
                ResourceStats::Topic(self.send_command::<_, TopicStats>("pubsub.stats", Empty {}).await?)
            }
        })
    }

    fn reactive(&self, error: Error) -> synap_reactive::Error {
        error.into_reactive(self.config.timeout)
    }
}

/// Where the next stream read starts: the server's position if it sent one,
/// otherwise just past the last event, otherwise where this read started.
fn resume_offset(reported: Option<u64>, events: &[RawMessage], from_offset: u64) -> u64 {
    reported
        .or_else(|| {
            events
                .last()
                .and_then(|event| event.offset)
                .map(|offset| offset.saturating_add(1))
        })
        .unwrap_or(from_offset)
}

/// Streams and topics carry JSON on the wire; anything else is sent as a
/// JSON string when it is UTF-8, and as a byte array otherwise.
fn json_body(payload: &[u8]) -> Result<Value> {
    if let Ok(value) = serde_json::from_slice(payload) {
        return Ok(value);
    }

    Ok(match std::str::from_utf8(payload) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => serde_json::to_value(payload)?,
    })
}

#[async_trait]
impl RemoteChannel for HttpChannel {
    async fn consume(
        &self,
        resource: &Resource,
        consumer_id: &str,
        cursor: Option<u64>,
        limit: usize,
    ) -> synap_reactive::Result<Fetched> {
        self.consume_inner(resource, consumer_id, cursor, limit)
            .await
            .map_err(|error| self.reactive(error))
    }

    async fn ack(&self, resource: &Resource, message_id: &str) -> synap_reactive::Result<AckReceipt> {
        match resource.kind {
            ResourceKind::Queue => self
                .settle(
                    "queue.ack",
                    QueueSettle {
                        queue: &resource.name,
                        message_id,
                        requeue: None,
                    },
                )
                .await
                .map_err(|error| self.reactive(error)),
            ResourceKind::Stream | ResourceKind::Topic => Ok(AckReceipt { success: true }),
        }
    }

    async fn nack(
        &self,
        resource: &Resource,
        message_id: &str,
        requeue: bool,
    ) -> synap_reactive::Result<AckReceipt> {
        match resource.kind {
            ResourceKind::Queue => self
                .settle(
                    "queue.nack",
                    QueueSettle {
                        queue: &resource.name,
                        message_id,
                        requeue: Some(requeue),
                    },
                )
                .await
                .map_err(|error| self.reactive(error)),
            ResourceKind::Stream | ResourceKind::Topic => Ok(AckReceipt { success: true }),
        }
    }

    async fn publish(
        &self,
        resource: &Resource,
        payload: Bytes,
        options: PublishOptions,
    ) -> synap_reactive::Result<PublishReceipt> {
        self.publish_inner(resource, payload, options)
            .await
            .map_err(|error| self.reactive(error))
    }

    async fn stats(&self, resource: &Resource) -> synap_reactive::Result<ResourceStats> {
        self.stats_inner(resource)
            .await
            .map_err(|error| self.reactive(error))
    }

    async fn release(&self, resource: &Resource, consumer_id: &str) {
        if resource.kind == ResourceKind::Topic {
            debug!(%resource, consumer_id, "closing topic bridge");
            self.drop_bridge(&resource.name, consumer_id);
        }
    }
}
