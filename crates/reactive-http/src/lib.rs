//! HTTP implementation of the reactive remote channel.
//!
//! [`HttpChannel`] talks to a running service through its StreamableHTTP
//! command endpoint (`POST api/v1/command`) and its pub/sub WebSocket
//! (`/pubsub/ws`). Plug it into a [`synap_reactive::ReactiveClient`] to get
//! polling consumers against a real server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bridge;
mod channel;
mod config;
mod error;
mod wire;

pub use channel::HttpChannel;
pub use config::HttpChannelConfig;
pub use error::{Error, Result};
