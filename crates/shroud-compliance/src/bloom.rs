//! Bloom chain-state screening.
//!
//! Each flagged masked commitment maps to two slots of the chain-state bit
//! array. A transaction is refused when its merged chain state has both
//! slots of any flagged entry set. The check is O(1) per flagged entry and
//! independent of how many ancestors the inputs have.
//!
//! Tradeoff: the check has no false negatives but does have false
//! positives. An honest note whose ancestry happens to cover both slots of
//! some flagged entry is refused as tainted. With `s` of `m` slots set the
//! chance that an unrelated entry matches is about `(s / m)^2`, so long
//! mixing histories grow more likely to be refused over time. Exact-mode
//! pools do not have this failure mode at the cost of one proof per
//! ancestor.

use tracing::{debug, warn};

use shroud_core::{FieldElement, SharedCrypto};
use shroud_state::{ChainState, StateError, StatusFlaggedEvent};

use crate::error::ComplianceError;

/// Summary of a passing screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreeningReport {
    /// Flagged entries tested.
    pub checked: usize,
    /// Set slots in the screened chain state.
    pub popcount: usize,
    /// Estimated chance that an unrelated entry would have matched.
    pub false_positive_rate: f64,
}

/// Flagged masked commitments, ready to screen chain states.
#[derive(Clone)]
pub struct BloomScreen {
    crypto: SharedCrypto,
    bits: usize,
    flagged: Vec<FieldElement>,
}

impl BloomScreen {
    /// Screen for chain states of `bits` slots with nothing flagged yet.
    pub fn new(crypto: SharedCrypto, bits: usize) -> Self {
        Self {
            crypto,
            bits,
            flagged: Vec::new(),
        }
    }

    /// Screen over every `StatusFlagged` event.
    pub fn from_events(crypto: SharedCrypto, bits: usize, events: &[StatusFlaggedEvent]) -> Self {
        let mut screen = Self::new(crypto, bits);
        for ev in events {
            screen.add(ev.masked_commitment);
        }
        screen
    }

    /// Add a flagged masked commitment.
    pub fn add(&mut self, masked: FieldElement) {
        if !self.flagged.contains(&masked) {
            self.flagged.push(masked);
        }
    }

    /// Flagged masked commitments.
    pub fn flagged(&self) -> &[FieldElement] {
        &self.flagged
    }

    /// Refuse `state` if it may descend from a flagged entry.
    pub fn screen(&self, state: &ChainState) -> Result<ScreeningReport, ComplianceError> {
        if state.len_bits() != self.bits {
            return Err(StateError::ChainStateSize {
                expected: self.bits,
                got: state.len_bits(),
            }
            .into());
        }
        for masked in &self.flagged {
            if state.contains_masked(self.crypto.as_ref(), masked) {
                warn!(masked = %masked, popcount = state.popcount(), "chain state matches flagged entry");
                return Err(ComplianceError::Tainted {
                    masked_commitment: *masked,
                });
            }
        }
        let report = ScreeningReport {
            checked: self.flagged.len(),
            popcount: state.popcount(),
            false_positive_rate: state.false_positive_rate(),
        };
        debug!(?report, "chain state screened");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::Blake3Provider;

    #[test]
    fn merged_taint_is_caught() {
        let c = Blake3Provider::shared();
        let bad = FieldElement::from(666);
        let tainted = ChainState::for_masked(c.as_ref(), &bad, 1024);
        let mut clean = ChainState::new(1024);
        for i in 0..5u64 {
            clean.insert_masked(c.as_ref(), &FieldElement::from(i));
        }

        let mut screen = BloomScreen::new(c.clone(), 1024);
        screen.add(bad);
        screen.add(bad);
        assert_eq!(screen.flagged().len(), 1);

        let report = screen.screen(&clean).expect("clean passes");
        assert_eq!(report.checked, 1);

        let mut mixed = clean.clone();
        mixed.merge(&tainted).expect("merge");
        assert!(matches!(
            screen.screen(&mixed),
            Err(ComplianceError::Tainted { masked_commitment }) if masked_commitment == bad
        ));
    }

    #[test]
    fn saturated_state_is_a_false_positive() {
        let c = Blake3Provider::shared();
        let mut full = ChainState::new(64);
        for i in 0..64 {
            full.set(i);
        }
        let screen = BloomScreen::from_events(
            c,
            64,
            &[StatusFlaggedEvent {
                block_number: 1,
                log_index: 0,
                index: 0,
                masked_commitment: FieldElement::from(12345),
            }],
        );
        assert!(screen.screen(&full).is_err());
        assert!(full.false_positive_rate() >= 1.0);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let screen = BloomScreen::new(Blake3Provider::shared(), 128);
        assert!(matches!(
            screen.screen(&ChainState::new(64)),
            Err(ComplianceError::State(StateError::ChainStateSize { .. }))
        ));
    }
}
