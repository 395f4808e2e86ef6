//! Reactive polling consumers for queues, event streams and pub/sub topics.
//!
//! A remote messaging service that only offers request/response commands
//! (`consume`, `ack`, `nack`, `publish`, `stats`) is turned into cancellable,
//! concurrency-bounded streams of [`Envelope`]s. Delivery is at-least-once:
//! anything not acknowledged is eventually redelivered by the service.
//!
//! The service is reached through a [`RemoteChannel`]; this crate never talks
//! to the network itself.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Acknowledgement handles.
pub mod ack;

/// The command surface of the remote service.
pub mod channel;

/// Consumer registrations and subscriptions.
pub mod consumer;

/// Payload decoding.
pub mod decoder;

/// Delivered messages.
pub mod envelope;

/// Envelope filters.
pub mod filter;

/// Handler-driven processing.
pub mod process;

/// Pub/sub manager.
pub mod pubsub;

/// Queue manager.
pub mod queue;

/// Consumer lifecycle tracking.
pub mod registry;

/// Tick generation.
pub mod scheduler;

/// Statistics polling.
pub mod stats;

/// Stream manager.
pub mod stream;

mod client;
mod config;
mod dispatcher;
mod error;

#[cfg(test)]
mod testing;

pub use ack::AckHandle;
pub use channel::{
    AckReceipt, Fetched, PublishOptions, PublishReceipt, QueueStats, RawMessage, RemoteChannel,
    Resource, ResourceKind, ResourceStats, StreamStats, TopicStats,
};
pub use client::ReactiveClient;
pub use config::{ConsumerOptions, ReactiveConfig, StatsPollerConfig};
pub use consumer::{ConsumerHandle, ConsumerRegistration, Subscription};
pub use decoder::{DecodePolicy, Decoder, JsonDecoder, Payload, RawDecoder};
pub use envelope::Envelope;
pub use error::{BoxError, Error, Result};
pub use filter::{EnvelopeStreamExt, EventFilter};
pub use process::{MessageHandler, ProcessOutcome, Processing};
pub use registry::{ConsumerKey, LifecycleRegistry};
pub use stats::StatsSnapshot;
