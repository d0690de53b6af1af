//! Predicates and extractors over collections of messages, used by the
//! certificate validators.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::message::{CommittedSeal, Message, MessageType};

/// Failure to read a typed payload out of a message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The message does not carry the payload the caller asked for.
    #[error("expected a {expected} payload, found {found}")]
    UnexpectedType {
        expected: MessageType,
        found: MessageType,
    },
}

/// Whether every message comes from a distinct sender.
pub fn has_unique_senders(messages: &[Message]) -> bool {
    let mut seen = BTreeSet::new();
    messages.iter().all(|message| seen.insert(&message.from))
}

/// Whether every message speaks for one and the same proposal hash.
///
/// A message without a proposal hash (ROUND-CHANGE) fails the check.
pub fn have_same_proposal_hash(messages: &[Message]) -> bool {
    let Some(first) = messages.first() else {
        return false;
    };

    let Some(expected) = first.proposal_hash() else {
        return false;
    };

    messages
        .iter()
        .all(|message| message.proposal_hash() == Some(expected))
}

/// Whether every message is for the given height.
pub fn all_have_same_height(messages: &[Message], height: u64) -> bool {
    !messages.is_empty() && messages.iter().all(|message| message.view.height == height)
}

/// Whether every message is for one and the same round.
pub fn all_have_same_round(messages: &[Message]) -> bool {
    let Some(first) = messages.first() else {
        return false;
    };

    messages
        .iter()
        .all(|message| message.view.round == first.view.round)
}

/// Whether every message is for a round strictly below the given limit.
pub fn all_have_lower_round(messages: &[Message], round_limit: u64) -> bool {
    !messages.is_empty()
        && messages
            .iter()
            .all(|message| message.view.round < round_limit)
}

/// Extract the committed seals out of a set of COMMIT messages.
///
/// Fails on the first message that is not a COMMIT.
pub fn extract_committed_seals(messages: &[Message]) -> Result<Vec<CommittedSeal>, PayloadError> {
    messages
        .iter()
        .map(|message| {
            message
                .committed_seal()
                .ok_or_else(|| PayloadError::UnexpectedType {
                    expected: MessageType::Commit,
                    found: message.message_type(),
                })
        })
        .collect()
}
