//! The consensus message model: views, typed payloads and certificates.

use core::fmt;

use bytes::Bytes;

/// The address of a validator, opaque to the consensus core.
///
/// The backend decides what an id means (usually the 20-byte address
/// recovered from the message signature); the core only ever compares ids
/// and hands them back to the backend.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidatorId(Bytes);

impl ValidatorId {
    /// Create a new `ValidatorId` from raw bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Create a new `ValidatorId` by copying the given slice.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Return the raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({self})")
    }
}

/// A view is a point in the protocol: the sequence height and the round
/// within that height.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View {
    /// The height of the sequence.
    pub height: u64,

    /// The round within the height. Resets to 0 at every new height.
    pub round: u64,
}

impl View {
    /// Create a new `View` for the given height and round.
    pub fn new(height: u64, round: u64) -> Self {
        Self { height, round }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.height, self.round)
    }
}

/// The four consensus message types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    /// The proposer's proposal for a round.
    PrePrepare,

    /// A validator's endorsement of the proposal it accepted.
    Prepare,

    /// A validator's commitment to the prepared proposal, carrying its seal.
    Commit,

    /// A validator's intent to abandon its current round.
    RoundChange,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::PrePrepare => write!(f, "pre-prepare"),
            MessageType::Prepare => write!(f, "prepare"),
            MessageType::Commit => write!(f, "commit"),
            MessageType::RoundChange => write!(f, "round-change"),
        }
    }
}

/// A raw proposal body together with the round at which that body was first
/// produced (not the round of the message currently carrying it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    /// The proposal body, opaque to the core.
    pub raw_proposal: Bytes,

    /// The round the body was produced at.
    pub round: u64,
}

impl Proposal {
    /// Create a new `Proposal`.
    pub fn new(raw_proposal: Bytes, round: u64) -> Self {
        Self {
            raw_proposal,
            round,
        }
    }
}

/// A validator signature over a committed proposal hash, with the address of
/// the validator that produced it. A quorum of seals is the ledger-level
/// proof of commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommittedSeal {
    /// The address associated with the seal.
    pub signer: ValidatorId,

    /// The seal itself.
    pub signature: Bytes,
}

impl CommittedSeal {
    /// Create a new `CommittedSeal` from an address and a signature.
    pub fn new(signer: ValidatorId, signature: Bytes) -> Self {
        Self { signer, signature }
    }
}

/// Evidence that a quorum prepared a specific proposal at some prior round.
///
/// Carried in ROUND-CHANGE messages so that a proposer taking over a later
/// round re-proposes the value the network may already have committed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedCertificate {
    /// The PRE-PREPARE message the quorum prepared on.
    pub proposal_message: Box<Message>,

    /// The PREPARE messages making up the quorum.
    pub prepare_messages: Vec<Message>,
}

impl PreparedCertificate {
    /// Create a new `PreparedCertificate`.
    pub fn new(proposal_message: Message, prepare_messages: Vec<Message>) -> Self {
        Self {
            proposal_message: Box::new(proposal_message),
            prepare_messages,
        }
    }
}

/// A quorum of ROUND-CHANGE messages for the same view, justifying a
/// PRE-PREPARE at a round above zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundChangeCertificate {
    /// The ROUND-CHANGE messages making up the certificate.
    pub round_change_messages: Vec<Message>,
}

impl RoundChangeCertificate {
    /// Create a new `RoundChangeCertificate`.
    pub fn new(round_change_messages: Vec<Message>) -> Self {
        Self {
            round_change_messages,
        }
    }
}

/// The payload of a PRE-PREPARE message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrePreparePayload {
    /// The proposed value.
    pub proposal: Proposal,

    /// The backend-computed hash of the proposal.
    pub proposal_hash: Bytes,

    /// The round-change certificate justifying the proposal.
    /// Mandatory for rounds above zero, absent at round zero.
    pub round_change_certificate: Option<RoundChangeCertificate>,
}

/// The payload of a PREPARE message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparePayload {
    /// The hash of the proposal being prepared.
    pub proposal_hash: Bytes,
}

/// The payload of a COMMIT message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitPayload {
    /// The hash of the proposal being committed.
    pub proposal_hash: Bytes,

    /// The sender's seal over the proposal hash.
    pub committed_seal: Bytes,
}

/// The payload of a ROUND-CHANGE message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundChangePayload {
    /// The proposal this node last prepared on, if any.
    pub last_prepared_proposal: Option<Proposal>,

    /// The certificate witnessing that prepare, if any.
    pub latest_prepared_certificate: Option<PreparedCertificate>,
}

/// A typed consensus message payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    PrePrepare(PrePreparePayload),
    Prepare(PreparePayload),
    Commit(CommitPayload),
    RoundChange(RoundChangePayload),
}

/// A consensus message as exchanged between validators.
///
/// The signature is opaque to the core: sender authentication is entirely
/// the backend's business, via `is_valid_validator`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The id of the sending validator.
    pub from: ValidatorId,

    /// The sender's signature over the message, verified by the backend.
    pub signature: Bytes,

    /// The view the message belongs to.
    pub view: View,

    /// The typed payload.
    pub payload: Payload,
}

impl Message {
    /// Return the type of this message.
    pub fn message_type(&self) -> MessageType {
        match &self.payload {
            Payload::PrePrepare(_) => MessageType::PrePrepare,
            Payload::Prepare(_) => MessageType::Prepare,
            Payload::Commit(_) => MessageType::Commit,
            Payload::RoundChange(_) => MessageType::RoundChange,
        }
    }

    /// Return the proposal hash the message speaks for, if its type carries
    /// one (PRE-PREPARE, PREPARE and COMMIT do, ROUND-CHANGE does not).
    pub fn proposal_hash(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::PrePrepare(payload) => Some(&payload.proposal_hash),
            Payload::Prepare(payload) => Some(&payload.proposal_hash),
            Payload::Commit(payload) => Some(&payload.proposal_hash),
            Payload::RoundChange(_) => None,
        }
    }

    /// Return the proposal carried by a PRE-PREPARE message.
    pub fn proposal(&self) -> Option<&Proposal> {
        match &self.payload {
            Payload::PrePrepare(payload) => Some(&payload.proposal),
            _ => None,
        }
    }

    /// Return the round-change certificate attached to a PRE-PREPARE message.
    pub fn round_change_certificate(&self) -> Option<&RoundChangeCertificate> {
        match &self.payload {
            Payload::PrePrepare(payload) => payload.round_change_certificate.as_ref(),
            _ => None,
        }
    }

    /// Return the committed seal carried by a COMMIT message, attributed to
    /// its sender.
    pub fn committed_seal(&self) -> Option<CommittedSeal> {
        match &self.payload {
            Payload::Commit(payload) => Some(CommittedSeal::new(
                self.from.clone(),
                payload.committed_seal.clone(),
            )),
            _ => None,
        }
    }

    /// Return the last prepared proposal carried by a ROUND-CHANGE message.
    pub fn last_prepared_proposal(&self) -> Option<&Proposal> {
        match &self.payload {
            Payload::RoundChange(payload) => payload.last_prepared_proposal.as_ref(),
            _ => None,
        }
    }

    /// Return the prepared certificate carried by a ROUND-CHANGE message.
    pub fn latest_prepared_certificate(&self) -> Option<&PreparedCertificate> {
        match &self.payload {
            Payload::RoundChange(payload) => payload.latest_prepared_certificate.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ValidatorId {
        ValidatorId::from_slice(&[byte; 20])
    }

    fn commit(byte: u8) -> Message {
        Message {
            from: id(byte),
            signature: Bytes::new(),
            view: View::new(1, 0),
            payload: Payload::Commit(CommitPayload {
                proposal_hash: Bytes::from_static(b"hash"),
                committed_seal: Bytes::from_static(b"seal"),
            }),
        }
    }

    #[test]
    fn committed_seal_is_attributed_to_sender() {
        let message = commit(7);
        let seal = message.committed_seal().unwrap();

        assert_eq!(seal.signer, id(7));
        assert_eq!(seal.signature, Bytes::from_static(b"seal"));
    }

    #[test]
    fn accessors_are_none_for_other_types() {
        let message = commit(1);

        assert_eq!(message.message_type(), MessageType::Commit);
        assert!(message.proposal().is_none());
        assert!(message.round_change_certificate().is_none());
        assert!(message.last_prepared_proposal().is_none());
        assert!(message.latest_prepared_certificate().is_none());
    }

    #[test]
    fn validator_id_renders_as_hex() {
        let id = ValidatorId::from_slice(&[0xab, 0xcd]);
        assert_eq!(id.to_string(), "0xabcd");
    }
}
