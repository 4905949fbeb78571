//! Subscription types for live value updates.

use crate::types::{Reply, RequestId};
use serde::{Deserialize, Serialize};

/// What to do when a subscriber channel is full at delivery time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the reply that did not fit; the subscription stays active.
    #[default]
    DropNewest,
    /// Cancel the subscription.
    DropSubscriber,
}

/// Handle to a subscription whose channel was created by the store.
pub struct SubscriptionHandle {
    /// Id to pass to `Store::cancel`.
    pub id: RequestId,
    /// Channel to receive replies.
    pub receiver: crossbeam_channel::Receiver<Reply>,
}

impl SubscriptionHandle {
    /// Receive the next reply (blocking).
    pub fn recv(&self) -> Result<Reply, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a reply (non-blocking).
    pub fn try_recv(&self) -> Result<Reply, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Reply, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
