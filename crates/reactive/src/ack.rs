use crate::channel::{AckReceipt, RemoteChannel, Resource};
use crate::error::{Error, Result};

use std::fmt;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// One concurrency slot of a consumer. Shared by every envelope produced by
/// the same fetch; the slot frees once all of them are settled or dropped.
pub(crate) type Slot = Arc<OwnedSemaphorePermit>;

enum State {
    Pending {
        channel: Arc<dyn RemoteChannel>,
        requeue_on_nack: bool,
    },
    Settled,
}

/// Acknowledgement handle for a single delivered message.
///
/// `ack` and `nack` consume the handle, so one delivery cannot be settled
/// twice from this process. The service may still redeliver a message whose
/// ack deadline passed; handling such duplicates is up to the caller.
pub struct AckHandle {
    resource: Resource,
    message_id: String,
    state: State,
    _slot: Option<Slot>,
}

impl AckHandle {
    pub(crate) fn pending(
        channel: Arc<dyn RemoteChannel>,
        resource: Resource,
        message_id: String,
        requeue_on_nack: bool,
        slot: Option<Slot>,
    ) -> Self {
        Self {
            resource,
            message_id,
            state: State::Pending {
                channel,
                requeue_on_nack,
            },
            _slot: slot,
        }
    }

    /// A handle whose message was already acknowledged by the framework.
    pub(crate) fn settled(resource: Resource, message_id: String, slot: Option<Slot>) -> Self {
        Self {
            resource,
            message_id,
            state: State::Settled,
            _slot: slot,
        }
    }

    /// The message this handle settles.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// The resource the message came from.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Whether the message was already settled (auto-ack).
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self.state, State::Settled)
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns the channel error if the ack call fails, or [`Error::Rejected`]
    /// if the service refused it. Nothing is retried.
    pub async fn ack(self) -> Result<()> {
        let State::Pending { channel, .. } = &self.state else {
            return Ok(());
        };

        debug!(resource = %self.resource, message_id = %self.message_id, "ack");
        let receipt = channel.ack(&self.resource, &self.message_id).await?;
        self.check(receipt)
    }

    /// Negatively acknowledges the message using the consumer's
    /// `requeue_on_nack` setting.
    ///
    /// # Errors
    ///
    /// See [`AckHandle::ack`].
    pub async fn nack(self) -> Result<()> {
        let requeue = match &self.state {
            State::Pending {
                requeue_on_nack, ..
            } => *requeue_on_nack,
            State::Settled => return Ok(()),
        };

        self.nack_with(requeue).await
    }

    /// Negatively acknowledges the message, requeueing it or not.
    ///
    /// # Errors
    ///
    /// See [`AckHandle::ack`].
    pub async fn nack_with(self, requeue: bool) -> Result<()> {
        let State::Pending { channel, .. } = &self.state else {
            return Ok(());
        };

        debug!(resource = %self.resource, message_id = %self.message_id, requeue, "nack");
        let receipt = channel
            .nack(&self.resource, &self.message_id, requeue)
            .await?;
        self.check(receipt)
    }

    fn check(&self, receipt: AckReceipt) -> Result<()> {
        if receipt.success {
            Ok(())
        } else {
            Err(Error::Rejected {
                message_id: self.message_id.clone(),
            })
        }
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("resource", &self.resource)
            .field("message_id", &self.message_id)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}
