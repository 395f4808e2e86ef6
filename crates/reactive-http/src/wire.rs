//! Command payloads and replies of the StreamableHTTP endpoint.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synap_reactive::RawMessage;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub(crate) struct CommandRequest<'a, P> {
    pub command: &'a str,
    pub request_id: String,
    pub payload: P,
}

impl<'a, P> CommandRequest<'a, P> {
    pub(crate) fn new(command: &'a str, payload: P) -> Self {
        Self {
            command,
            request_id: Uuid::new_v4().to_string(),
            payload,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommandReply {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueueConsume<'a> {
    pub queue: &'a str,
    pub consumer_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueueSettle<'a> {
    pub queue: &'a str,
    pub message_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueuePublish<'a> {
    pub queue: &'a str,
    pub payload: &'a [u8],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "no_headers")]
    pub headers: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueueName<'a> {
    pub queue: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamConsume<'a> {
    pub room: &'a str,
    pub subscriber_id: &'a str,
    pub from_offset: u64,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamPublish<'a> {
    pub room: &'a str,
    pub event: &'a str,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct RoomName<'a> {
    pub room: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TopicPublish<'a> {
    pub topic: &'a str,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "no_headers")]
    pub metadata: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Empty {}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_headers(headers: &&HashMap<String, String>) -> bool {
    headers.is_empty()
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueConsumed {
    pub message: Option<QueueMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueMessage {
    pub id: String,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl From<QueueMessage> for RawMessage {
    fn from(message: QueueMessage) -> Self {
        Self {
            id: message.id,
            payload: Bytes::from(message.payload),
            priority: message.priority,
            retry_count: message.retry_count,
            headers: message.headers,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Published {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamConsumed {
    #[serde(default)]
    pub events: Vec<StreamEvent>,
    pub next_offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamEvent {
    pub id: String,
    pub offset: u64,
    pub event: String,
    pub data: Vec<u8>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<StreamEvent> for RawMessage {
    fn from(event: StreamEvent) -> Self {
        Self {
            id: event.id,
            payload: Bytes::from(event.data),
            offset: Some(event.offset),
            timestamp: event.timestamp,
            name: Some(event.event),
            headers: event.metadata,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamPublished {
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TopicPublished {
    #[serde(alias = "delivered_count")]
    pub subscribers_matched: usize,
}

/// A frame pushed over the pub/sub WebSocket.
#[derive(Debug, Deserialize)]
pub(crate) struct Frame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, alias = "data")]
    pub payload: Option<Value>,
    #[serde(default, alias = "headers")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a WebSocket frame means to a subscriber.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameEvent {
    Message(RawMessage),
    Error(String),
    Ignored,
}

impl Frame {
    pub(crate) fn parse(text: &str) -> serde_json::Result<FrameEvent> {
        let frame: Self = serde_json::from_str(text)?;

        match frame.kind.as_deref() {
            None | Some("message" | "publish") => frame.into_message(),
            Some("error") => Ok(FrameEvent::Error(
                frame.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
            Some(_) => Ok(FrameEvent::Ignored),
        }
    }

    fn into_message(self) -> serde_json::Result<FrameEvent> {
        let (Some(topic), Some(payload)) = (self.topic, self.payload) else {
            return Ok(FrameEvent::Ignored);
        };

        Ok(FrameEvent::Message(RawMessage {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            payload: Bytes::from(serde_json::to_vec(&payload)?),
            priority: self.priority,
            timestamp: self.timestamp,
            name: Some(topic),
            headers: self.metadata.unwrap_or_default(),
            ..RawMessage::default()
        }))
    }
}
