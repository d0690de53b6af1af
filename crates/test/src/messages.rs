//! Builders for peer messages, so scenario tests read like the protocol.

use bytes::Bytes;

use istanbulbft_core_types::{
    CommitPayload, Message, Payload, PrePreparePayload, PreparePayload, PreparedCertificate,
    Proposal, RoundChangeCertificate, RoundChangePayload, ValidatorId, View,
};

use crate::backend::{test_signature, TestBackend};

/// A PRE-PREPARE from `from` proposing `raw_proposal` for the view, with
/// the hash computed the way the test backend computes it.
pub fn pre_prepare_message(
    from: ValidatorId,
    view: View,
    raw_proposal: Bytes,
    round_change_certificate: Option<RoundChangeCertificate>,
) -> Message {
    let proposal_hash = TestBackend::proposal_hash(&raw_proposal);

    Message {
        from,
        signature: test_signature(),
        view,
        payload: Payload::PrePrepare(PrePreparePayload {
            proposal: Proposal::new(raw_proposal, view.round),
            proposal_hash,
            round_change_certificate,
        }),
    }
}

/// A PREPARE from `from` for the given proposal hash.
pub fn prepare_message(from: ValidatorId, view: View, proposal_hash: Bytes) -> Message {
    Message {
        from,
        signature: test_signature(),
        view,
        payload: Payload::Prepare(PreparePayload { proposal_hash }),
    }
}

/// A COMMIT from `from` for the given proposal hash, sealed the way the
/// test backend validates seals.
pub fn commit_message(from: ValidatorId, view: View, proposal_hash: Bytes) -> Message {
    let committed_seal = TestBackend::seal(&from, &proposal_hash);

    Message {
        from,
        signature: test_signature(),
        view,
        payload: Payload::Commit(CommitPayload {
            proposal_hash,
            committed_seal,
        }),
    }
}

/// A ROUND-CHANGE from `from` carrying no prepared state.
pub fn round_change_message(from: ValidatorId, view: View) -> Message {
    Message {
        from,
        signature: test_signature(),
        view,
        payload: Payload::RoundChange(RoundChangePayload {
            last_prepared_proposal: None,
            latest_prepared_certificate: None,
        }),
    }
}

/// A ROUND-CHANGE from `from` carrying the proposal it last prepared on and
/// the certificate witnessing it.
pub fn round_change_message_with_certificate(
    from: ValidatorId,
    view: View,
    last_prepared_proposal: Proposal,
    latest_prepared_certificate: PreparedCertificate,
) -> Message {
    Message {
        from,
        signature: test_signature(),
        view,
        payload: Payload::RoundChange(RoundChangePayload {
            last_prepared_proposal: Some(last_prepared_proposal),
            latest_prepared_certificate: Some(latest_prepared_certificate),
        }),
    }
}
