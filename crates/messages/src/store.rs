//! The message store: a thread-safe, subscribable mailbox for consensus
//! messages, indexed by (type, height, round) and deduplicated by sender.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use istanbulbft_core_types::{Message, MessageType, ValidatorId, View};

use crate::subscription::{Subscription, SubscriptionDetails, SubscriptionId};

type SenderMap = BTreeMap<ValidatorId, Message>;
type RoundMap = BTreeMap<u64, SenderMap>;
type HeightMap = BTreeMap<u64, RoundMap>;

struct SubscriptionEntry {
    details: SubscriptionDetails,
    tx: mpsc::UnboundedSender<u64>,
}

pub(crate) struct StoreInner {
    messages: HashMap<MessageType, HeightMap>,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    next_subscription_id: SubscriptionId,
}

impl StoreInner {
    fn new() -> Self {
        Self {
            messages: HashMap::new(),
            subscriptions: HashMap::new(),
            next_subscription_id: 0,
        }
    }

    pub(crate) fn remove_subscription(&mut self, id: SubscriptionId) {
        self.subscriptions.remove(&id);
    }

    fn senders_at(&self, message_type: MessageType, view: View) -> Option<&SenderMap> {
        self.messages
            .get(&message_type)?
            .get(&view.height)?
            .get(&view.round)
    }

    fn messages_at(&self, message_type: MessageType, view: View) -> Vec<Message> {
        self.senders_at(message_type, view)
            .map(|senders| senders.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Wake every subscription matching the given type and view, should its
    /// predicate hold over the messages stored there.
    fn notify(&self, message_type: MessageType, view: View) {
        let messages = self.messages_at(message_type, view);

        for entry in self.subscriptions.values() {
            let details = &entry.details;

            if details.message_type != message_type || details.view.height != view.height {
                continue;
            }

            let round_matches = if details.has_min_round {
                view.round >= details.view.round
            } else {
                view.round == details.view.round
            };

            if !round_matches {
                continue;
            }

            if !(details.has_quorum_fn)(view.height, &messages, message_type) {
                continue;
            }

            // A closed receiver unsubscribes itself on drop
            let _ = entry.tx.send(view.round);
        }
    }
}

/// A shared handle to the message store.
///
/// The store is independently thread-safe and is the source of truth for
/// inbound messages; clones share the same underlying storage.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MessageStore {
    /// Create a new, empty message store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("message store lock poisoned")
    }

    /// Insert a message into the store.
    ///
    /// A later message from the same sender at the same (type, view)
    /// replaces the earlier one, which is what makes insertion idempotent.
    /// No validation and no signalling happens here; both belong to the
    /// ingress logic of the consensus core.
    pub fn add_message(&self, message: Message) {
        let message_type = message.message_type();
        let view = message.view;

        self.lock()
            .messages
            .entry(message_type)
            .or_default()
            .entry(view.height)
            .or_default()
            .entry(view.round)
            .or_default()
            .insert(message.from.clone(), message);
    }

    /// Drop every message below the given height, for all message types.
    pub fn prune_by_height(&self, height: u64) {
        let mut inner = self.lock();

        for heights in inner.messages.values_mut() {
            heights.retain(|&message_height, _| message_height >= height);
        }
    }

    /// Wake the subscriptions concerned by the view and type of the given
    /// message, subject to their own quorum predicates.
    pub fn signal_event(&self, message: &Message) {
        self.lock().notify(message.message_type(), message.view);
    }

    /// Return the messages of the given type stored at exactly `view` that
    /// pass `is_valid`. Messages failing the predicate are evicted so they
    /// are not revisited on the next wakeup.
    pub fn get_valid_messages(
        &self,
        view: View,
        message_type: MessageType,
        is_valid: impl Fn(&Message) -> bool,
    ) -> Vec<Message> {
        let mut inner = self.lock();

        let Some(senders) = inner
            .messages
            .get_mut(&message_type)
            .and_then(|heights| heights.get_mut(&view.height))
            .and_then(|rounds| rounds.get_mut(&view.round))
        else {
            return Vec::new();
        };

        let mut valid = Vec::with_capacity(senders.len());

        senders.retain(|_, message| {
            if is_valid(message) {
                valid.push(message.clone());
                true
            } else {
                false
            }
        });

        valid
    }

    /// Assemble an extended round-change certificate for the given height.
    ///
    /// Scans every round with ROUND-CHANGE messages at `height`, keeps the
    /// messages passing `is_valid_message`, and returns the largest set for
    /// which `is_valid_rcc(round, set)` holds. The first round seen wins
    /// ties. Returns `None` when no such set exists.
    pub fn get_extended_rcc(
        &self,
        height: u64,
        is_valid_message: impl Fn(&Message) -> bool,
        is_valid_rcc: impl Fn(u64, &[Message]) -> bool,
    ) -> Option<Vec<Message>> {
        let inner = self.lock();

        let rounds = inner
            .messages
            .get(&MessageType::RoundChange)?
            .get(&height)?;

        let mut best: Option<Vec<Message>> = None;

        for (&round, senders) in rounds {
            let valid: Vec<Message> = senders
                .values()
                .filter(|message| is_valid_message(message))
                .cloned()
                .collect();

            if valid.is_empty() || !is_valid_rcc(round, &valid) {
                continue;
            }

            if best.as_ref().is_none_or(|b| valid.len() > b.len()) {
                best = Some(valid);
            }
        }

        best
    }

    /// Return the ROUND-CHANGE messages of the round at or above `min_round`
    /// holding the most messages at the given height. The lowest qualifying
    /// round wins ties.
    pub fn get_most_round_change_messages(&self, min_round: u64, height: u64) -> Vec<Message> {
        let inner = self.lock();

        let Some(rounds) = inner
            .messages
            .get(&MessageType::RoundChange)
            .and_then(|heights| heights.get(&height))
        else {
            return Vec::new();
        };

        let mut most: Vec<Message> = Vec::new();

        for (_, senders) in rounds.range(min_round..) {
            if senders.len() > most.len() {
                most = senders.values().cloned().collect();
            }
        }

        most
    }

    /// Register a subscription.
    ///
    /// Stored messages are evaluated against the details right away, so a
    /// subscriber arriving after the interesting messages does not miss its
    /// wakeup.
    pub fn subscribe(&self, details: SubscriptionDetails) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.lock();

        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;

        let rounds_to_check: Vec<u64> = inner
            .messages
            .get(&details.message_type)
            .and_then(|heights| heights.get(&details.view.height))
            .map(|rounds| {
                if details.has_min_round {
                    rounds.range(details.view.round..).map(|(&r, _)| r).collect()
                } else {
                    rounds
                        .contains_key(&details.view.round)
                        .then_some(details.view.round)
                        .into_iter()
                        .collect()
                }
            })
            .unwrap_or_default();

        for round in rounds_to_check {
            let view = View::new(details.view.height, round);
            let messages = inner.messages_at(details.message_type, view);

            if (details.has_quorum_fn)(view.height, &messages, details.message_type) {
                let _ = tx.send(round);
            }
        }

        inner
            .subscriptions
            .insert(id, SubscriptionEntry { details, tx });

        Subscription {
            id,
            rx,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription. Dropping the `Subscription` handle does the
    /// same thing.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().remove_subscription(id);
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
