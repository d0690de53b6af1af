//! Store subscriptions: how workers wait for quorum-relevant messages.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use istanbulbft_core_types::{Message, MessageType, View};

use crate::store::StoreInner;

/// Identifier of a live subscription.
pub type SubscriptionId = u64;

/// The predicate deciding whether a set of stored messages is worth waking a
/// subscriber for. Receives the height, the messages stored at the signalled
/// view, and the message type.
pub type HasQuorumFn = Arc<dyn Fn(u64, &[Message], MessageType) -> bool + Send + Sync>;

/// What a subscriber wants to be woken for.
#[derive(Clone)]
pub struct SubscriptionDetails {
    /// The message type of interest.
    pub message_type: MessageType,

    /// The view of interest.
    pub view: View,

    /// When set, the subscription also fires for any round greater than or
    /// equal to `view.round`, delivering the triggering round.
    pub has_min_round: bool,

    /// The wakeup predicate, evaluated against the messages stored at the
    /// triggering view.
    pub has_quorum_fn: HasQuorumFn,
}

/// A live subscription to the message store.
///
/// Wakeups are delivered at-least-once; handlers must tolerate spurious
/// ones. Dropping the subscription unsubscribes it, so an aborted worker
/// cannot leave a dangling registration behind.
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) rx: mpsc::UnboundedReceiver<u64>,
    pub(crate) store: Weak<Mutex<StoreInner>>,
}

impl Subscription {
    /// Return the id of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next wakeup, yielding the round that triggered it.
    ///
    /// Returns `None` only once the store itself is gone.
    pub async fn recv(&mut self) -> Option<u64> {
        self.rx.recv().await
    }

    /// Poll for a pending wakeup without blocking.
    pub fn try_recv(&mut self) -> Option<u64> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            if let Ok(mut inner) = inner.lock() {
                inner.remove_subscription(self.id);
            }
        }
    }
}
