use crate::ack::AckHandle;
use crate::channel::{RawMessage, Resource};
use crate::decoder::Payload;
use crate::error::Result;

/// A fetched message together with its decoded payload and acknowledgement
/// handle.
///
/// The envelope is owned by whoever processes it. Settling it with
/// [`ack`](Self::ack) or [`nack`](Self::nack) (or dropping it) frees the
/// consumer's concurrency slot. Envelopes delivered before their consumer was
/// stopped stay fully usable.
#[derive(Debug)]
pub struct Envelope<T> {
    raw: RawMessage,
    payload: Payload<T>,
    handle: AckHandle,
}

impl<T> Envelope<T> {
    pub(crate) const fn new(raw: RawMessage, payload: Payload<T>, handle: AckHandle) -> Self {
        Self {
            raw,
            payload,
            handle,
        }
    }

    /// The message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.raw.id
    }

    /// The undecoded message and its metadata.
    #[must_use]
    pub const fn raw(&self) -> &RawMessage {
        &self.raw
    }

    /// The decoded payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload<T> {
        &self.payload
    }

    /// The resource the message came from.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        self.handle.resource()
    }

    /// Whether the framework already acknowledged the message (auto-ack).
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.handle.is_settled()
    }

    /// Splits the envelope so the payload can be moved into a handler while
    /// the handle is kept for settlement.
    #[must_use]
    pub fn into_parts(self) -> (RawMessage, Payload<T>, AckHandle) {
        (self.raw, self.payload, self.handle)
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// See [`AckHandle::ack`].
    pub async fn ack(self) -> Result<()> {
        self.handle.ack().await
    }

    /// Negatively acknowledges the message with the consumer's default
    /// requeue setting.
    ///
    /// # Errors
    ///
    /// See [`AckHandle::ack`].
    pub async fn nack(self) -> Result<()> {
        self.handle.nack().await
    }

    /// Negatively acknowledges the message, requeueing it or not.
    ///
    /// # Errors
    ///
    /// See [`AckHandle::ack`].
    pub async fn nack_with(self, requeue: bool) -> Result<()> {
        self.handle.nack_with(requeue).await
    }
}
