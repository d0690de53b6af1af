//! The sequence and round state machine of an IBFT-style consensus engine.
//!
//! For a given block height, a [`Sequencer`] cooperates with the other
//! validators, through a host-supplied [`Backend`] and [`Transport`], to
//! agree on exactly one proposal, producing a committed proposal plus a
//! quorum of committed seals for insertion into the ledger.
//!
//! The driver owns a per-round set of workers: a round timer, watchers for
//! higher-round evidence, and the PRE-PREPARE / PREPARE / COMMIT reception
//! loops. Rounds escalate on timeout and on witnessing higher-round
//! evidence; safety across round changes rests on the prepared-certificate
//! and round-change-certificate validation in this crate.

#![forbid(unsafe_code)]

mod config;
mod round;
mod sequencer;
mod state;
mod validation;
mod watch;

pub use istanbulbft_core_types as types;
pub use istanbulbft_messages as messages;

#[doc(inline)]
pub use istanbulbft_core_types::{Backend, MessageBuilder, Transport, ValidatorBackend, Verifier};

pub use crate::config::Timeouts;
pub use crate::sequencer::Sequencer;
