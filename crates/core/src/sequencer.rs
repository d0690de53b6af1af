//! The sequence driver: runs the round loop for one height until a proposal
//! is committed.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use istanbulbft_core_types::{Backend, Message, Transport, View};
use istanbulbft_messages::{HasQuorumFn, MessageStore};

use crate::config::Timeouts;
use crate::state::SharedState;

/// The events a round's workers can hand to the driver. Exactly one is
/// consumed per round iteration; the rest die with the round's channel.
#[derive(Debug)]
pub(crate) enum RoundEvent {
    /// A valid proposal for a higher round was observed.
    FutureProposal { round: u64, message: Message },

    /// A round-change certificate for a higher round materialized.
    FutureRcc { round: u64 },

    /// The round timer fired.
    Expired,

    /// A COMMIT quorum was reached and the proposal inserted; the sequence
    /// is complete.
    Done,
}

/// What the driver and its workers share for the lifetime of a sequence.
pub(crate) struct Shared<B, T> {
    pub(crate) backend: Arc<B>,
    pub(crate) transport: T,
    pub(crate) store: MessageStore,
    pub(crate) state: SharedState,
    pub(crate) timeouts: Timeouts,
}

/// The consensus driver for one validator.
///
/// [`run_sequence`](Sequencer::run_sequence) runs a single height to
/// completion; inbound messages are fed in concurrently through
/// [`add_message`](Sequencer::add_message). Cancelling a sequence is
/// dropping its future: every worker of the current round is aborted with
/// it.
pub struct Sequencer<B, T> {
    shared: Arc<Shared<B, T>>,
}

impl<B, T> Clone for Sequencer<B, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B, T> Sequencer<B, T>
where
    B: Backend,
    T: Transport,
{
    /// Create a new `Sequencer` on top of the given backend and transport.
    pub fn new(backend: B, transport: T, timeouts: Timeouts) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend: Arc::new(backend),
                transport,
                store: MessageStore::new(),
                state: SharedState::default(),
                timeouts,
            }),
        }
    }

    /// The height of the running sequence.
    pub fn height(&self) -> u64 {
        self.shared.state.height()
    }

    /// The round the running sequence is at.
    pub fn round(&self) -> u64 {
        self.shared.state.round()
    }

    /// The message store backing this sequencer.
    pub fn messages(&self) -> &MessageStore {
        &self.shared.store
    }

    /// Ingress for inbound consensus messages.
    ///
    /// Messages from unknown senders, for heights below the sequence or for
    /// rounds already left behind are dropped. Anything else is stored, and
    /// the store's waiters are woken once the message's view reaches quorum.
    pub fn add_message(&self, message: Message) {
        if !self.shared.backend.is_valid_validator(&message) {
            debug!(from = %message.from, "message from unknown validator, dropping");
            return;
        }

        let view = message.view;
        let state_view = self.shared.state.view();

        if view.height < state_view.height {
            debug!(%view, height = state_view.height, "message below the current height, dropping");
            return;
        }

        if view.round < state_view.round {
            debug!(%view, round = state_view.round, "message below the current round, dropping");
            return;
        }

        let message_type = message.message_type();
        self.shared.store.add_message(message.clone());

        let messages = self
            .shared
            .store
            .get_valid_messages(view, message_type, |_| true);

        if self
            .shared
            .backend
            .has_quorum(view.height, &messages, message_type)
        {
            self.shared.store.signal_event(&message);
        }
    }

    /// Run the sequence for the given height to completion.
    ///
    /// Returns once a COMMIT quorum was reached and the proposal handed to
    /// the backend. Dropping the returned future cancels the sequence and
    /// aborts every worker of the round in flight.
    pub async fn run_sequence(&self, height: u64) {
        self.shared.state.clear(height);
        self.shared.store.prune_by_height(height);

        info!(height, "sequence started");

        loop {
            let round = self.shared.state.round();
            let view = View::new(height, round);

            info!(height, round, "round started");

            let (tx, mut rx) = mpsc::channel(1);
            let mut workers = JoinSet::new();

            workers.spawn(Arc::clone(&self.shared).round_timer(round, tx.clone()));
            workers.spawn(Arc::clone(&self.shared).watch_future_proposal(tx.clone()));
            workers.spawn(Arc::clone(&self.shared).watch_future_rcc(tx.clone()));
            workers.spawn(Arc::clone(&self.shared).run_round(tx));

            let event = rx.recv().await;

            // Tear the round down before acting on the event: no worker may
            // outlive the round that spawned it, or observe the transition
            // below.
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            drop(rx);

            match event {
                Some(RoundEvent::FutureProposal { round, message }) => {
                    info!(height, round, "future proposal received");

                    let proposal_hash = message.proposal_hash().cloned();

                    self.shared.state.move_to_new_round(round);
                    self.shared.state.accept_proposal(message);
                    self.shared.state.set_round_started(true);

                    if let Some(proposal_hash) = proposal_hash {
                        self.shared
                            .send_prepare(proposal_hash, View::new(height, round));
                    }
                }

                Some(RoundEvent::FutureRcc { round }) => {
                    info!(height, round, "future round-change certificate received");

                    self.shared.state.move_to_new_round(round);
                }

                Some(RoundEvent::Expired) => {
                    warn!(height, round, "round expired");

                    let next_round = round + 1;

                    self.shared.state.move_to_new_round(next_round);
                    self.shared
                        .send_round_change(View::new(height, next_round));
                }

                Some(RoundEvent::Done) => {
                    info!(height, round, "sequence done");
                    return;
                }

                // All workers finished without an event; nothing observed
                // this round, start it over.
                None => {
                    debug!(%view, "round ended without an event");
                    continue;
                }
            }
        }
    }
}

impl<B, T> Shared<B, T>
where
    B: Backend,
    T: Transport,
{
    /// The store-subscription predicate deferring to the backend's quorum.
    pub(crate) fn backend_quorum_fn(&self) -> HasQuorumFn {
        let backend = Arc::clone(&self.backend);

        Arc::new(move |height, messages, message_type| {
            backend.has_quorum(height, messages, message_type)
        })
    }

    /// Build and multicast a PREPARE for the given proposal hash.
    pub(crate) fn send_prepare(&self, proposal_hash: Bytes, view: View) {
        debug!(%view, "sending prepare");

        let message = self.backend.build_prepare_message(proposal_hash, view);
        self.transport.multicast(message);
    }

    /// Build and multicast a COMMIT for the given proposal hash, marking the
    /// commit as sent.
    pub(crate) fn send_commit(&self, proposal_hash: Bytes, view: View) {
        debug!(%view, "sending commit");

        let message = self.backend.build_commit_message(proposal_hash, view);
        self.transport.multicast(message);
        self.state.set_commit_sent(true);
    }

    /// Build and multicast a ROUND-CHANGE for the given view, carrying the
    /// latest prepared proposal and certificate, when this node has them.
    pub(crate) fn send_round_change(&self, view: View) {
        debug!(%view, "sending round change");

        let message = self.backend.build_round_change_message(
            self.state.latest_prepared_proposal(),
            self.state.latest_prepared_certificate(),
            view,
        );
        self.transport.multicast(message);
    }
}
