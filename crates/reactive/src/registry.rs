//! Lifecycle registry for running consumers.
//!
//! Every consumer is keyed by its resource and consumer id and owns a
//! [`CancellationToken`] derived from the registry's root token. Stopping a
//! consumer only prevents new fetches; work already in flight is left to
//! finish, since aborting an acknowledgement half way would leave the message
//! in an unknown state on the service.

use crate::channel::Resource;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one consumer registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConsumerKey {
    /// Resource being consumed.
    pub resource: Resource,
    /// Consumer (or subscriber) id.
    pub consumer_id: String,
}

impl ConsumerKey {
    /// Creates a key.
    pub fn new(resource: Resource, consumer_id: impl Into<String>) -> Self {
        Self {
            resource,
            consumer_id: consumer_id.into(),
        }
    }
}

impl fmt::Display for ConsumerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.consumer_id)
    }
}

/// A live registration returned by [`LifecycleRegistry::register`].
#[derive(Clone, Debug)]
pub struct Registration {
    /// Registered key.
    pub key: ConsumerKey,
    /// Distinguishes this registration from earlier ones with the same key.
    pub generation: u64,
    /// Cancelled when the consumer is stopped.
    pub token: CancellationToken,
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// Maps consumer keys to their cancellation tokens.
#[derive(Debug)]
pub struct LifecycleRegistry {
    entries: Mutex<HashMap<ConsumerKey, Entry>>,
    next_generation: AtomicU64,
    root: CancellationToken,
}

impl LifecycleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Registers a consumer and returns a fresh token for it.
    ///
    /// An existing registration with the same key is stopped first; its token
    /// is never reused.
    pub fn register(&self, key: ConsumerKey) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        let previous = self.entries.lock().insert(
            key.clone(),
            Entry {
                generation,
                token: token.clone(),
            },
        );

        if let Some(previous) = previous {
            debug!(consumer = %key, "replacing existing consumer registration");
            previous.token.cancel();
        }

        Registration {
            key,
            generation,
            token,
        }
    }

    /// Stops a consumer. Returns `false` if no consumer was registered under
    /// `key`; stopping twice is harmless.
    pub fn stop(&self, key: &ConsumerKey) -> bool {
        let removed = self.entries.lock().remove(key);

        removed.is_some_and(|entry| {
            debug!(consumer = %key, "stopping consumer");
            entry.token.cancel();
            true
        })
    }

    /// Stops every registered consumer and clears the registry. Returns the
    /// number of consumers stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(ConsumerKey, Entry)> = self.entries.lock().drain().collect();

        for (key, entry) in &drained {
            debug!(consumer = %key, "stopping consumer");
            entry.token.cancel();
        }

        drained.len()
    }

    /// Removes a registration that ended on its own. Newer registrations with
    /// the same key are left alone.
    pub fn release(&self, registration: &Registration) {
        let mut entries = self.entries.lock();

        if entries
            .get(&registration.key)
            .is_some_and(|entry| entry.generation == registration.generation)
        {
            entries.remove(&registration.key);
        }
    }

    /// Whether a consumer is registered and not cancelled.
    #[must_use]
    pub fn is_active(&self, key: &ConsumerKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.token.is_cancelled())
    }

    /// Keys of all registered consumers.
    #[must_use]
    pub fn active_keys(&self) -> Vec<ConsumerKey> {
        self.entries.lock().keys().cloned().collect()
    }

    /// A token cancelled on [`shutdown`](Self::shutdown), for background
    /// work that is not a registered consumer.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Stops everything, including work started after this call.
    pub fn shutdown(&self) {
        self.stop_all();
        self.root.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
