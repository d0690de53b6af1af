//! The mutable state of a single sequence.

use std::sync::{Mutex, MutexGuard};

use istanbulbft_core_types::{CommittedSeal, Message, PreparedCertificate, Proposal, View};

/// The per-sequence state proper. Lives behind [`SharedState`].
#[derive(Debug, Default)]
struct SequenceState {
    /// The view the sequence is at.
    view: View,

    /// The PRE-PREPARE accepted for the current round, if any.
    /// At most one per round; a round transition clears it.
    proposal_message: Option<Message>,

    /// The proposal extracted from `proposal_message`.
    accepted_proposal: Option<Proposal>,

    /// The certificate of the highest round at which this node observed a
    /// PREPARE quorum. Survives round transitions.
    latest_prepared_certificate: Option<PreparedCertificate>,

    /// The proposal `latest_prepared_certificate` speaks for.
    latest_prepared_proposal: Option<Proposal>,

    /// The committed seals extracted once COMMIT quorum was reached.
    committed_seals: Vec<CommittedSeal>,

    /// Whether the round task has started the current round.
    round_started: bool,

    /// Whether this node already multicast its COMMIT for the current round.
    commit_sent: bool,
}

/// Serialized access to the state of a sequence.
///
/// The driver and its reception workers all mutate through this wrapper;
/// the lock is only ever held for the duration of a single call, never
/// across a suspension point.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    inner: Mutex<SequenceState>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.inner.lock().expect("sequence state lock poisoned")
    }

    /// Reset the state for a fresh sequence at the given height.
    pub(crate) fn clear(&self, height: u64) {
        *self.lock() = SequenceState {
            view: View::new(height, 0),
            ..SequenceState::default()
        };
    }

    pub(crate) fn view(&self) -> View {
        self.lock().view
    }

    pub(crate) fn height(&self) -> u64 {
        self.lock().view.height
    }

    pub(crate) fn round(&self) -> u64 {
        self.lock().view.round
    }

    /// Mark the current round started, clearing the per-round transients if
    /// and only if the round was not already running. A round pre-populated
    /// by a future-proposal hop keeps its accepted proposal.
    pub(crate) fn start_new_round(&self) {
        let mut state = self.lock();

        if !state.round_started {
            state.round_started = true;
            state.proposal_message = None;
            state.accepted_proposal = None;
            state.commit_sent = false;
        }
    }

    /// Move the sequence to the given round, dropping the per-round
    /// transients. The prepared certificate and proposal survive so they can
    /// be carried into future ROUND-CHANGE messages.
    pub(crate) fn move_to_new_round(&self, round: u64) {
        let mut state = self.lock();

        state.view = View::new(state.view.height, round);
        state.round_started = false;
        state.proposal_message = None;
        state.accepted_proposal = None;
        state.commit_sent = false;
    }

    pub(crate) fn set_round_started(&self, round_started: bool) {
        self.lock().round_started = round_started;
    }

    /// Accept a PRE-PREPARE for the current round.
    pub(crate) fn accept_proposal(&self, proposal_message: Message) {
        let mut state = self.lock();

        state.accepted_proposal = proposal_message.proposal().cloned();
        state.proposal_message = Some(proposal_message);
    }

    pub(crate) fn proposal_message(&self) -> Option<Message> {
        self.lock().proposal_message.clone()
    }

    pub(crate) fn accepted_proposal(&self) -> Option<Proposal> {
        self.lock().accepted_proposal.clone()
    }

    /// Record the PREPARE quorum reached for the current round.
    pub(crate) fn finalize_prepare(&self, certificate: PreparedCertificate, proposal: Proposal) {
        let mut state = self.lock();

        state.latest_prepared_certificate = Some(certificate);
        state.latest_prepared_proposal = Some(proposal);
    }

    pub(crate) fn latest_prepared_certificate(&self) -> Option<PreparedCertificate> {
        self.lock().latest_prepared_certificate.clone()
    }

    pub(crate) fn latest_prepared_proposal(&self) -> Option<Proposal> {
        self.lock().latest_prepared_proposal.clone()
    }

    pub(crate) fn commit_sent(&self) -> bool {
        self.lock().commit_sent
    }

    pub(crate) fn set_commit_sent(&self, commit_sent: bool) {
        self.lock().commit_sent = commit_sent;
    }

    pub(crate) fn set_committed_seals(&self, committed_seals: Vec<CommittedSeal>) {
        self.lock().committed_seals = committed_seals;
    }

    #[allow(dead_code)]
    pub(crate) fn committed_seals(&self) -> Vec<CommittedSeal> {
        self.lock().committed_seals.clone()
    }
}
