//! The per-round state machine: the proposer path and the three reception
//! loops.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use istanbulbft_core_types::{
    extract_committed_seals, Backend, Message, MessageType, PreparedCertificate, Proposal,
    RoundChangeCertificate, Transport, View,
};
use istanbulbft_messages::SubscriptionDetails;

use crate::sequencer::{RoundEvent, Shared};
use crate::validation;

impl<B, T> Shared<B, T>
where
    B: Backend,
    T: Transport,
{
    /// Run one round: propose if it is our turn, then receive until the
    /// round is cancelled or the commit quorum lands.
    pub(crate) async fn run_round(self: Arc<Self>, tx: mpsc::Sender<RoundEvent>) {
        self.state.start_new_round();
        let view = self.state.view();

        if self
            .backend
            .is_proposer(&self.backend.id(), view.height, view.round)
        {
            debug!(%view, "we are the proposer");

            let Some(proposal_message) = self.build_proposal_message(view).await else {
                return;
            };

            self.state.accept_proposal(proposal_message.clone());
            info!(%view, "proposal built and accepted");

            self.transport.multicast(proposal_message);
        }

        // The three reception loops run concurrently. PREPARE and COMMIT
        // gate on state (accepted proposal, commit sent), so phase ordering
        // emerges from state rather than from task startup order.
        tokio::join!(
            self.recv_pre_prepare(view),
            self.recv_prepare(view),
            self.recv_commit(view, tx),
        );
    }

    /// Build the PRE-PREPARE this node proposes for the view.
    ///
    /// At round 0 the proposal is freshly built. Above round 0 the node
    /// first awaits a round-change certificate for the view, then re-uses
    /// the proposal prepared at the highest certified round if the
    /// certificate carries one.
    async fn build_proposal_message(&self, view: View) -> Option<Message> {
        if view.round == 0 {
            let raw_proposal = self.backend.build_proposal(view);

            return Some(
                self.backend
                    .build_pre_prepare_message(raw_proposal, None, view),
            );
        }

        let certificate = self.wait_for_rcc(view).await?;

        let mut best: Option<(u64, &Message)> = None;

        for message in &certificate.round_change_messages {
            let Some(prepared) = message.latest_prepared_certificate() else {
                continue;
            };

            let round = prepared.proposal_message.view.round;

            // Strictly greater: of several certificates for the same round,
            // the first one seen decides.
            if best.is_none_or(|(max_round, _)| round > max_round) {
                best = Some((round, message));
            }
        }

        let raw_proposal = match best.and_then(|(_, message)| message.last_prepared_proposal()) {
            Some(previous) => {
                debug!(%view, previous_round = previous.round, "re-proposing the prepared value");
                previous.raw_proposal.clone()
            }
            None => self.backend.build_proposal(view),
        };

        Some(
            self.backend
                .build_pre_prepare_message(raw_proposal, Some(certificate), view),
        )
    }

    /// Await a round-change certificate for exactly this view.
    ///
    /// Only returns `None` when the store goes away underneath us, which
    /// can only happen at teardown.
    async fn wait_for_rcc(&self, view: View) -> Option<RoundChangeCertificate> {
        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::RoundChange,
            view,
            has_min_round: false,
            has_quorum_fn: self.backend_quorum_fn(),
        });

        while sub.recv().await.is_some() {
            if let Some(certificate) = self.handle_round_change_message(view) {
                return Some(certificate);
            }
        }

        None
    }

    /// Assemble an extended round-change certificate out of the store, if
    /// one exists for the height of the given view.
    pub(crate) fn handle_round_change_message(&self, view: View) -> Option<RoundChangeCertificate> {
        let has_accepted_proposal = self.state.proposal_message().is_some();
        let current_round = self.state.round();

        let messages = self.store.get_extended_rcc(
            view.height,
            |message| {
                let proposal = message.last_prepared_proposal();
                let certificate = message.latest_prepared_certificate();

                if !validation::valid_pc(
                    self.backend.as_ref(),
                    certificate,
                    message.view.round,
                    view.height,
                ) {
                    return false;
                }

                validation::proposal_matches_certificate(
                    self.backend.as_ref(),
                    proposal,
                    certificate,
                )
            },
            |round, messages| {
                // A round we already accepted a proposal at is not worth
                // changing out of
                if round <= current_round && has_accepted_proposal {
                    return false;
                }

                self.backend
                    .has_quorum(view.height, messages, MessageType::RoundChange)
            },
        )?;

        Some(RoundChangeCertificate::new(messages))
    }

    /// Wait for an acceptable PRE-PREPARE for this view, accept it and
    /// answer it with a PREPARE. Idle when this node already accepted one
    /// (the proposer path).
    async fn recv_pre_prepare(&self, view: View) {
        if self.state.proposal_message().is_some() {
            return;
        }

        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::PrePrepare,
            view,
            has_min_round: false,
            has_quorum_fn: Arc::new(|_, messages, _| !messages.is_empty()),
        });

        while sub.recv().await.is_some() {
            let Some(message) = self.handle_pre_prepare(view) else {
                continue;
            };

            // Re-delivery of an already-accepted proposal is a no-op
            if self.state.proposal_message().is_none() {
                let proposal_hash = message.proposal_hash().cloned();

                self.state.accept_proposal(message);
                info!(%view, "proposal accepted");

                if let Some(proposal_hash) = proposal_hash {
                    self.send_prepare(proposal_hash, view);
                }
            }

            return;
        }
    }

    /// Return the first acceptable PRE-PREPARE stored for the view.
    pub(crate) fn handle_pre_prepare(&self, view: View) -> Option<Message> {
        let messages = self
            .store
            .get_valid_messages(view, MessageType::PrePrepare, |message| {
                if view.round == 0 {
                    validation::validate_proposal_0(self.backend.as_ref(), message, view)
                } else {
                    validation::validate_proposal(self.backend.as_ref(), message, view)
                }
            });

        messages.into_iter().next()
    }

    /// Wait for a PREPARE quorum on the accepted proposal, then finalize the
    /// prepared certificate and multicast our COMMIT.
    async fn recv_prepare(&self, view: View) {
        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::Prepare,
            view,
            has_min_round: false,
            has_quorum_fn: self.backend_quorum_fn(),
        });

        while sub.recv().await.is_some() {
            if self.handle_prepare(view) {
                return;
            }
        }
    }

    /// Evaluate the stored PREPAREs for the view. Returns true once the
    /// quorum was reached and the commit sent.
    pub(crate) fn handle_prepare(&self, view: View) -> bool {
        // Nothing to prepare on yet, or we already committed
        let Some(proposal) = self.state.accepted_proposal() else {
            return false;
        };

        if self.state.commit_sent() {
            return false;
        }

        let Some(proposal_message) = self.state.proposal_message() else {
            return false;
        };

        let prepare_messages = self
            .store
            .get_valid_messages(view, MessageType::Prepare, |message| {
                message
                    .proposal_hash()
                    .is_some_and(|hash| self.backend.is_valid_proposal_hash(&proposal, hash))
            });

        let proposal_hash = match proposal_message.proposal_hash() {
            Some(hash) => hash.clone(),
            None => return false,
        };

        let mut all_messages = Vec::with_capacity(1 + prepare_messages.len());
        all_messages.push(proposal_message);
        all_messages.extend(prepare_messages.iter().cloned());

        if !self
            .backend
            .has_quorum(view.height, &all_messages, MessageType::Prepare)
        {
            return false;
        }

        info!(%view, prepares = prepare_messages.len(), "prepare quorum reached");

        let proposal_message = all_messages.swap_remove(0);
        let certificate = PreparedCertificate::new(proposal_message, prepare_messages);

        self.state.finalize_prepare(certificate, proposal);
        self.send_commit(proposal_hash, view);

        true
    }

    /// Wait for a COMMIT quorum on the accepted proposal, insert it into
    /// the ledger and signal the driver that the sequence is done.
    async fn recv_commit(&self, view: View, tx: mpsc::Sender<RoundEvent>) {
        let mut sub = self.store.subscribe(SubscriptionDetails {
            message_type: MessageType::Commit,
            view,
            has_min_round: false,
            has_quorum_fn: self.backend_quorum_fn(),
        });

        while sub.recv().await.is_some() {
            if self.handle_commit(view) {
                let _ = tx.send(RoundEvent::Done).await;
                return;
            }
        }
    }

    /// Evaluate the stored COMMITs for the view. Returns true once the
    /// quorum was reached and the proposal inserted.
    pub(crate) fn handle_commit(&self, view: View) -> bool {
        let Some(proposal) = self.state.accepted_proposal() else {
            return false;
        };

        let commit_messages = self
            .store
            .get_valid_messages(view, MessageType::Commit, |message| {
                let Some(hash) = message.proposal_hash() else {
                    return false;
                };

                if !self.backend.is_valid_proposal_hash(&proposal, hash) {
                    return false;
                }

                message
                    .committed_seal()
                    .is_some_and(|seal| self.backend.is_valid_committed_seal(hash, &seal))
            });

        if !self
            .backend
            .has_quorum(view.height, &commit_messages, MessageType::Commit)
        {
            return false;
        }

        let committed_seals = match extract_committed_seals(&commit_messages) {
            Ok(seals) => seals,
            Err(error) => {
                // Treated as quorum-not-met; the next wakeup retries
                warn!(%view, %error, "failed to extract committed seals");
                return false;
            }
        };

        info!(%view, seals = committed_seals.len(), "commit quorum reached");

        self.state.set_committed_seals(committed_seals.clone());

        let committed = Proposal::new(proposal.raw_proposal, view.round);
        self.backend.insert_proposal(&committed, &committed_seals);

        info!(%view, "proposal inserted");

        self.store.prune_by_height(view.height);

        true
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use istanbulbft_messages::MessageStore;
    use istanbulbft_test::{pre_prepare_message, round_change_message, ChannelTransport, TestBackend};

    use super::*;
    use crate::config::Timeouts;
    use crate::state::SharedState;

    fn shared() -> Arc<Shared<TestBackend, ChannelTransport>> {
        let backend = TestBackend::new(4, 42);
        let (transport, _outbound) = ChannelTransport::new();

        Arc::new(Shared {
            backend: Arc::new(backend),
            transport,
            store: MessageStore::new(),
            state: SharedState::default(),
            timeouts: Timeouts::default(),
        })
    }

    #[test]
    fn an_accepted_proposal_blocks_same_round_certificates() {
        let shared = shared();
        shared.state.clear(5);
        shared.state.move_to_new_round(2);

        let view = View::new(5, 2);

        for index in 1..4 {
            shared
                .store
                .add_message(round_change_message(shared.backend.validator(index), view));
        }

        // Without an accepted proposal, the certificate forms
        assert!(shared.handle_round_change_message(view).is_some());

        // Accepting a proposal at this round withdraws the node's consent to
        // leave it
        shared.state.accept_proposal(pre_prepare_message(
            shared.backend.proposer(5, 2),
            view,
            Bytes::from_static(b"block"),
            None,
        ));
        assert!(shared.handle_round_change_message(view).is_none());

        // Evidence for a higher round still goes through
        let higher = View::new(5, 3);

        for index in 1..4 {
            shared
                .store
                .add_message(round_change_message(shared.backend.validator(index), higher));
        }

        assert!(shared.handle_round_change_message(higher).is_some());
    }
}
