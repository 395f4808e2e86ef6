//! Envelope filtering

use crate::envelope::Envelope;

use std::fmt;
use std::future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

type Predicate<T> = Arc<dyn Fn(&Envelope<T>) -> bool + Send + Sync>;

/// Envelope filter
pub enum EventFilter<T> {
    /// Accept every envelope
    All,
    /// Event name (stream events) or topic (pub/sub) is one of these
    ByName(Vec<String>),
    /// Priority lies within `min..=max`; envelopes without a priority never match
    ByPriority {
        /// Lowest accepted priority
        min: u8,
        /// Highest accepted priority
        max: u8,
    },
    /// Custom predicate
    Predicate(Predicate<T>),
    /// Composite filter (AND)
    And(Vec<EventFilter<T>>),
    /// Composite filter (OR)
    Or(Vec<EventFilter<T>>),
    /// Negation filter
    Not(Box<EventFilter<T>>),
}

impl<T> EventFilter<T> {
    /// Filter on a single event name.
    pub fn name(name: impl Into<String>) -> Self {
        Self::ByName(vec![name.into()])
    }

    /// Filter on a custom predicate.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Envelope<T>) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Check if an envelope matches this filter
    pub fn matches(&self, envelope: &Envelope<T>) -> bool {
        match self {
            Self::All => true,

            Self::ByName(names) => envelope
                .raw()
                .name
                .as_ref()
                .is_some_and(|name| names.contains(name)),

            Self::ByPriority { min, max } => envelope
                .raw()
                .priority
                .is_some_and(|priority| (*min..=*max).contains(&priority)),

            Self::Predicate(predicate) => predicate(envelope),

            Self::And(filters) => filters.iter().all(|f| f.matches(envelope)),

            Self::Or(filters) => filters.iter().any(|f| f.matches(envelope)),

            Self::Not(filter) => !filter.matches(envelope),
        }
    }
}

impl<T> Clone for EventFilter<T> {
    fn clone(&self) -> Self {
        match self {
            Self::All => Self::All,
            Self::ByName(names) => Self::ByName(names.clone()),
            Self::ByPriority { min, max } => Self::ByPriority {
                min: *min,
                max: *max,
            },
            Self::Predicate(predicate) => Self::Predicate(Arc::clone(predicate)),
            Self::And(filters) => Self::And(filters.clone()),
            Self::Or(filters) => Self::Or(filters.clone()),
            Self::Not(filter) => Self::Not(filter.clone()),
        }
    }
}

impl<T> fmt::Debug for EventFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::ByName(names) => f.debug_tuple("ByName").field(names).finish(),
            Self::ByPriority { min, max } => f
                .debug_struct("ByPriority")
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::And(filters) => f.debug_tuple("And").field(filters).finish(),
            Self::Or(filters) => f.debug_tuple("Or").field(filters).finish(),
            Self::Not(filter) => f.debug_tuple("Not").field(filter).finish(),
        }
    }
}

impl<T> Default for EventFilter<T> {
    fn default() -> Self {
        Self::All
    }
}

/// Filtering adaptors for envelope streams.
///
/// Envelopes that do not match are dropped without being acknowledged; the
/// service redelivers them (queues) or they are simply skipped (streams and
/// topics).
pub trait EnvelopeStreamExt<T>
where
    Self: Stream<Item = Envelope<T>> + Send + Sized + 'static,
    T: Send + 'static,
{
    /// Keeps envelopes matching `filter`.
    fn filter_envelopes(self, filter: EventFilter<T>) -> BoxStream<'static, Envelope<T>> {
        self.filter(move |envelope| future::ready(filter.matches(envelope)))
            .boxed()
    }

    /// Keeps envelopes whose event name is `name`.
    fn filter_by_event_name(self, name: impl Into<String>) -> BoxStream<'static, Envelope<T>> {
        self.filter_envelopes(EventFilter::name(name))
    }

    /// Keeps envelopes with a priority in `min..=max`.
    fn filter_by_priority(self, min: u8, max: u8) -> BoxStream<'static, Envelope<T>> {
        self.filter_envelopes(EventFilter::ByPriority { min, max })
    }

    /// Keeps envelopes for which `predicate` returns `true`.
    fn filter_by_predicate<F>(self, predicate: F) -> BoxStream<'static, Envelope<T>>
    where
        F: Fn(&Envelope<T>) -> bool + Send + Sync + 'static,
    {
        self.filter_envelopes(EventFilter::predicate(predicate))
    }
}

impl<T, S> EnvelopeStreamExt<T> for S
where
    S: Stream<Item = Envelope<T>> + Send + 'static,
    T: Send + 'static,
{
}
