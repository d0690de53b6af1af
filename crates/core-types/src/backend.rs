//! The seams between the consensus core and its host: message verification,
//! message construction, validator-set policy and the ledger, plus the
//! transport the core multicasts through.
//!
//! All methods are synchronous; the core calls them from worker tasks whose
//! cancellation happens at their suspension points.

use bytes::Bytes;

use crate::message::{
    CommittedSeal, Message, MessageType, PreparedCertificate, Proposal, RoundChangeCertificate,
    ValidatorId, View,
};

/// Validation predicates over inbound messages and their contents.
pub trait Verifier: Send + Sync {
    /// Whether the raw proposal body is acceptable to the ledger.
    fn is_valid_proposal(&self, raw_proposal: &[u8]) -> bool;

    /// Whether the message was produced, and correctly signed, by a member
    /// of the validator set.
    fn is_valid_validator(&self, message: &Message) -> bool;

    /// Whether the given validator is the designated proposer for the view.
    fn is_proposer(&self, id: &ValidatorId, height: u64, round: u64) -> bool;

    /// Whether `hash` is the hash of `proposal`.
    fn is_valid_proposal_hash(&self, proposal: &Proposal, hash: &[u8]) -> bool;

    /// Whether the seal is a valid commitment over the proposal hash.
    fn is_valid_committed_seal(&self, proposal_hash: &[u8], seal: &CommittedSeal) -> bool;
}

/// Construction of outbound, signed consensus messages.
pub trait MessageBuilder: Send + Sync {
    /// Build a PRE-PREPARE for the raw proposal, attaching the round-change
    /// certificate justifying it when the view's round is above zero.
    fn build_pre_prepare_message(
        &self,
        raw_proposal: Bytes,
        round_change_certificate: Option<RoundChangeCertificate>,
        view: View,
    ) -> Message;

    /// Build a PREPARE for the given proposal hash.
    fn build_prepare_message(&self, proposal_hash: Bytes, view: View) -> Message;

    /// Build a COMMIT for the given proposal hash, carrying this node's seal.
    fn build_commit_message(&self, proposal_hash: Bytes, view: View) -> Message;

    /// Build a ROUND-CHANGE carrying the proposal this node last prepared
    /// on and the certificate witnessing it, when there is one.
    fn build_round_change_message(
        &self,
        last_prepared_proposal: Option<Proposal>,
        latest_prepared_certificate: Option<PreparedCertificate>,
        view: View,
    ) -> Message;
}

/// Validator-set policy and the ledger the committed proposals go into.
pub trait ValidatorBackend: Send + Sync {
    /// The id of the local validator.
    fn id(&self) -> ValidatorId;

    /// Produce a fresh raw proposal for the given view.
    fn build_proposal(&self, view: View) -> Bytes;

    /// Insert a committed proposal, together with the quorum of seals
    /// proving the commit, into the ledger.
    fn insert_proposal(&self, proposal: &Proposal, committed_seals: &[CommittedSeal]);

    /// Whether the given messages constitute a quorum for the message type
    /// at the given height.
    fn has_quorum(&self, height: u64, messages: &[Message], message_type: MessageType) -> bool;
}

/// Everything the consensus core needs from its host.
pub trait Backend: Verifier + MessageBuilder + ValidatorBackend + 'static {}

impl<B> Backend for B where B: Verifier + MessageBuilder + ValidatorBackend + 'static {}

/// Outbound dispatch of consensus messages to the validator set.
///
/// Best effort: the core assumes neither ordering nor reliability.
pub trait Transport: Send + Sync + 'static {
    /// Broadcast the message to every validator.
    fn multicast(&self, message: Message);
}
