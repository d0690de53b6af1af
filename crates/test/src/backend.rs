//! An in-memory backend: a fixed validator set with a round-robin proposer
//! policy, Keccak-256 proposal hashing and deterministic seals.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha3::{Digest, Keccak256};

use istanbulbft_core_types::{
    CommitPayload, CommittedSeal, Message, MessageBuilder, MessageType, Payload,
    PrePreparePayload, PreparePayload, PreparedCertificate, Proposal, RoundChangeCertificate,
    RoundChangePayload, ValidatorBackend, ValidatorId, Verifier, View,
};

/// The placeholder signature carried by every test message; the test
/// backend authenticates by validator-set membership alone.
pub fn test_signature() -> Bytes {
    Bytes::from_static(b"signature")
}

/// A deterministic in-memory backend for driving the consensus core in
/// tests.
///
/// Clones share the insertion log, so a test can hold on to one clone for
/// assertions while the sequencer owns another.
#[derive(Clone)]
pub struct TestBackend {
    id: ValidatorId,
    validators: Vec<ValidatorId>,
    inserted: Arc<Mutex<Vec<(Proposal, Vec<CommittedSeal>)>>>,
}

impl TestBackend {
    /// Create a backend with `validator_count` validators drawn from the
    /// given seed. The local node is validator 0; see
    /// [`with_local`](Self::with_local).
    pub fn new(validator_count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let validators: Vec<ValidatorId> = (0..validator_count)
            .map(|_| {
                let mut bytes = [0u8; 20];
                rng.fill_bytes(&mut bytes);
                ValidatorId::from_slice(&bytes)
            })
            .collect();

        let id = validators[0].clone();

        Self {
            id,
            validators,
            inserted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make the validator at `index` the local node.
    pub fn with_local(mut self, index: usize) -> Self {
        self.id = self.validators[index].clone();
        self
    }

    /// The id of the validator at `index`.
    pub fn validator(&self, index: usize) -> ValidatorId {
        self.validators[index].clone()
    }

    /// The designated proposer for the view: round robin over the set.
    pub fn proposer(&self, height: u64, round: u64) -> ValidatorId {
        let index = (height.wrapping_add(round) % self.validators.len() as u64) as usize;
        self.validators[index].clone()
    }

    /// The quorum size: `2N/3 + 1` messages.
    pub fn quorum(&self) -> usize {
        2 * self.validators.len() / 3 + 1
    }

    /// The Keccak-256 hash of a raw proposal body.
    pub fn proposal_hash(raw_proposal: &[u8]) -> Bytes {
        Bytes::copy_from_slice(&Keccak256::digest(raw_proposal))
    }

    /// The seal a validator produces over a proposal hash.
    pub fn seal(signer: &ValidatorId, proposal_hash: &[u8]) -> Bytes {
        let mut hasher = Keccak256::new();
        hasher.update(proposal_hash);
        hasher.update(signer.as_bytes());
        Bytes::copy_from_slice(&hasher.finalize())
    }

    /// The proposals inserted into the ledger so far.
    pub fn inserted(&self) -> Vec<(Proposal, Vec<CommittedSeal>)> {
        self.inserted.lock().expect("insertion log poisoned").clone()
    }
}

impl Verifier for TestBackend {
    fn is_valid_proposal(&self, raw_proposal: &[u8]) -> bool {
        !raw_proposal.is_empty()
    }

    fn is_valid_validator(&self, message: &Message) -> bool {
        self.validators.contains(&message.from)
    }

    fn is_proposer(&self, id: &ValidatorId, height: u64, round: u64) -> bool {
        *id == self.proposer(height, round)
    }

    fn is_valid_proposal_hash(&self, proposal: &Proposal, hash: &[u8]) -> bool {
        Self::proposal_hash(&proposal.raw_proposal) == hash
    }

    fn is_valid_committed_seal(&self, proposal_hash: &[u8], seal: &CommittedSeal) -> bool {
        Self::seal(&seal.signer, proposal_hash) == seal.signature
    }
}

impl MessageBuilder for TestBackend {
    fn build_pre_prepare_message(
        &self,
        raw_proposal: Bytes,
        round_change_certificate: Option<RoundChangeCertificate>,
        view: View,
    ) -> Message {
        let proposal_hash = Self::proposal_hash(&raw_proposal);

        Message {
            from: self.id.clone(),
            signature: test_signature(),
            view,
            payload: Payload::PrePrepare(PrePreparePayload {
                proposal: Proposal::new(raw_proposal, view.round),
                proposal_hash,
                round_change_certificate,
            }),
        }
    }

    fn build_prepare_message(&self, proposal_hash: Bytes, view: View) -> Message {
        Message {
            from: self.id.clone(),
            signature: test_signature(),
            view,
            payload: Payload::Prepare(PreparePayload { proposal_hash }),
        }
    }

    fn build_commit_message(&self, proposal_hash: Bytes, view: View) -> Message {
        let committed_seal = Self::seal(&self.id, &proposal_hash);

        Message {
            from: self.id.clone(),
            signature: test_signature(),
            view,
            payload: Payload::Commit(CommitPayload {
                proposal_hash,
                committed_seal,
            }),
        }
    }

    fn build_round_change_message(
        &self,
        last_prepared_proposal: Option<Proposal>,
        latest_prepared_certificate: Option<PreparedCertificate>,
        view: View,
    ) -> Message {
        Message {
            from: self.id.clone(),
            signature: test_signature(),
            view,
            payload: Payload::RoundChange(RoundChangePayload {
                last_prepared_proposal,
                latest_prepared_certificate,
            }),
        }
    }
}

impl ValidatorBackend for TestBackend {
    fn id(&self) -> ValidatorId {
        self.id.clone()
    }

    fn build_proposal(&self, view: View) -> Bytes {
        Bytes::from(format!("proposal {}/{}", view.height, view.round).into_bytes())
    }

    fn insert_proposal(&self, proposal: &Proposal, committed_seals: &[CommittedSeal]) {
        self.inserted
            .lock()
            .expect("insertion log poisoned")
            .push((proposal.clone(), committed_seals.to_vec()));
    }

    fn has_quorum(&self, _height: u64, messages: &[Message], message_type: MessageType) -> bool {
        match message_type {
            MessageType::PrePrepare => !messages.is_empty(),
            _ => messages.len() >= self.quorum(),
        }
    }
}
