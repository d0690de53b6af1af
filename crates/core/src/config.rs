//! Round timeout configuration.

use std::time::Duration;

/// Timeouts governing round escalation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeouts {
    /// How long round 0 waits before escalating.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub base_round_timeout: Duration,

    /// A flat extension applied to every round, e.g. to absorb a known
    /// block-building latency.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub additional_timeout: Duration,
}

impl Timeouts {
    /// The timeout of the given round: `base * 2^round + additional`,
    /// saturating for absurdly high rounds.
    pub fn round_timeout(&self, round: u64) -> Duration {
        let factor = if round < 32 { 1u32 << round } else { u32::MAX };

        self.base_round_timeout
            .saturating_mul(factor)
            .saturating_add(self.additional_timeout)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            base_round_timeout: Duration::from_secs(10),
            additional_timeout: Duration::from_secs(0),
        }
    }
}
