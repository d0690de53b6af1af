//! The message-validation predicates.
//!
//! Every predicate is a pure function of the backend and the message under
//! scrutiny; a failing message is dropped by the caller, never surfaced as
//! an error (an invalid message is an everyday event under Byzantine
//! faults).

use istanbulbft_core_types::{
    all_have_lower_round, all_have_same_height, all_have_same_round, has_unique_senders,
    have_same_proposal_hash, Backend, Message, MessageType, PreparedCertificate, Proposal, View,
};

/// Whether the prepared certificate is valid evidence of a PREPARE quorum
/// below `round_limit` at the given height.
///
/// An absent certificate is valid: absence of evidence is not invalid
/// evidence.
pub(crate) fn valid_pc(
    backend: &impl Backend,
    certificate: Option<&PreparedCertificate>,
    round_limit: u64,
    height: u64,
) -> bool {
    let Some(certificate) = certificate else {
        return true;
    };

    if certificate.prepare_messages.is_empty() {
        return false;
    }

    if certificate.proposal_message.message_type() != MessageType::PrePrepare {
        return false;
    }

    if certificate
        .prepare_messages
        .iter()
        .any(|message| message.message_type() != MessageType::Prepare)
    {
        return false;
    }

    // The quorum is counted over the proposal message and the prepares
    // together, the same shape `handle_prepare` finalizes.
    let mut all_messages = Vec::with_capacity(1 + certificate.prepare_messages.len());
    all_messages.push((*certificate.proposal_message).clone());
    all_messages.extend(certificate.prepare_messages.iter().cloned());

    if !backend.has_quorum(height, &all_messages, MessageType::Prepare) {
        return false;
    }

    if !has_unique_senders(&all_messages)
        || !have_same_proposal_hash(&all_messages)
        || !all_have_same_height(&all_messages, height)
        || !all_have_same_round(&all_messages)
        || !all_have_lower_round(&all_messages, round_limit)
    {
        return false;
    }

    let proposal_message = &certificate.proposal_message;

    if !backend.is_proposer(
        &proposal_message.from,
        proposal_message.view.height,
        proposal_message.view.round,
    ) {
        return false;
    }

    if !backend.is_valid_validator(proposal_message) {
        return false;
    }

    certificate.prepare_messages.iter().all(|message| {
        backend.is_valid_validator(message)
            && !backend.is_proposer(&message.from, message.view.height, message.view.round)
    })
}

/// The validations shared by round-0 and later-round proposals.
pub(crate) fn validate_proposal_common(
    backend: &impl Backend,
    message: &Message,
    view: View,
) -> bool {
    let Some(proposal) = message.proposal() else {
        return false;
    };

    let Some(proposal_hash) = message.proposal_hash() else {
        return false;
    };

    if proposal.round != view.round {
        return false;
    }

    if !backend.is_proposer(&message.from, view.height, view.round) {
        return false;
    }

    if !backend.is_valid_proposal_hash(proposal, proposal_hash) {
        return false;
    }

    backend.is_valid_proposal(&proposal.raw_proposal)
}

/// Whether the message is an acceptable round-0 proposal.
///
/// The proposer itself never accepts its own proposal through this path;
/// its acceptance happens on the builder path.
pub(crate) fn validate_proposal_0(backend: &impl Backend, message: &Message, view: View) -> bool {
    if view.round != 0 {
        return false;
    }

    if !validate_proposal_common(backend, message, view) {
        return false;
    }

    !backend.is_proposer(&backend.id(), view.height, view.round)
}

/// Whether the message is an acceptable proposal for a round above zero,
/// justified by a round-change certificate.
pub(crate) fn validate_proposal(backend: &impl Backend, message: &Message, view: View) -> bool {
    if !validate_proposal_common(backend, message, view) {
        return false;
    }

    if backend.is_proposer(&backend.id(), view.height, view.round) {
        return false;
    }

    let Some(certificate) = message.round_change_certificate() else {
        return false;
    };

    let round_change_messages = &certificate.round_change_messages;

    if round_change_messages.is_empty() {
        return false;
    }

    if !backend.has_quorum(view.height, round_change_messages, MessageType::RoundChange) {
        return false;
    }

    if !has_unique_senders(round_change_messages) {
        return false;
    }

    for round_change in round_change_messages {
        if round_change.message_type() != MessageType::RoundChange {
            return false;
        }

        if round_change.view != view {
            return false;
        }

        if !backend.is_valid_validator(round_change) {
            return false;
        }
    }

    // Proposal selection: if any round change carries a valid prepared
    // certificate, the proposal must re-propose the value of the
    // highest-round one. An invalid certificate counts as no certificate.
    let mut rounds_and_hashes = Vec::new();

    for round_change in round_change_messages {
        let Some(prepared) = round_change.latest_prepared_certificate() else {
            continue;
        };

        if !valid_pc(backend, Some(prepared), message.view.round, view.height) {
            continue;
        }

        let Some(hash) = prepared.proposal_message.proposal_hash() else {
            continue;
        };

        rounds_and_hashes.push((prepared.proposal_message.view.round, hash));
    }

    if rounds_and_hashes.is_empty() {
        return true;
    }

    let mut max_round = 0;
    let mut expected_hash = None;

    for (round, hash) in &rounds_and_hashes {
        if *round >= max_round {
            max_round = *round;
            expected_hash = Some(*hash);
        }
    }

    message.proposal_hash() == expected_hash
}

/// Whether the proposal is the one the certificate witnesses.
pub(crate) fn proposal_matches_certificate(
    backend: &impl Backend,
    proposal: Option<&Proposal>,
    certificate: Option<&PreparedCertificate>,
) -> bool {
    let (proposal, certificate) = match (proposal, certificate) {
        (None, None) => return true,
        (Some(proposal), Some(certificate)) => (proposal, certificate),
        _ => return false,
    };

    let Some(proposal_hash) = certificate.proposal_message.proposal_hash() else {
        return false;
    };

    let mut hashes = vec![proposal_hash];

    for prepare in &certificate.prepare_messages {
        let Some(hash) = prepare.proposal_hash() else {
            return false;
        };

        hashes.push(hash);
    }

    hashes
        .iter()
        .all(|hash| backend.is_valid_proposal_hash(proposal, hash))
}
