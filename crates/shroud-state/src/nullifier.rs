//! Spent-nullifier set.
//!
//! Fed from `NewNullifier` events; a reconstructed note is spendable only
//! while its nullifier is absent.

use hashbrown::HashSet;

use shroud_core::FieldElement;

use crate::events::NullifierEvent;

/// In-memory set of spent nullifiers.
#[derive(Clone, Debug, Default)]
pub struct NullifierSet {
    set: HashSet<FieldElement>,
}

impl NullifierSet {
    /// Create a new empty nullifier set.
    pub fn new() -> Self {
        Self {
            set: HashSet::new(),
        }
    }

    /// Set of all nullifiers announced by `events`.
    pub fn from_events(events: &[NullifierEvent]) -> Self {
        Self {
            set: events.iter().map(|e| e.nullifier).collect(),
        }
    }

    /// Returns `true` if the nullifier has already been seen.
    pub fn contains(&self, nf: &FieldElement) -> bool {
        self.set.contains(nf)
    }

    /// Insert a nullifier.
    ///
    /// Returns `true` if the nullifier was newly inserted, `false` if it already existed.
    pub fn insert(&mut self, nf: FieldElement) -> bool {
        self.set.insert(nf)
    }

    /// Number of spent nullifiers tracked.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_reports_false() {
        let mut s = NullifierSet::new();
        assert!(s.insert(FieldElement::from(1)));
        assert!(!s.insert(FieldElement::from(1)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn built_from_events() {
        let events: Vec<_> = (0..3u64)
            .map(|i| NullifierEvent {
                block_number: i,
                log_index: 0,
                nullifier: FieldElement::from(i + 7),
            })
            .collect();
        let s = NullifierSet::from_events(&events);
        assert!(s.contains(&FieldElement::from(9)));
        assert!(!s.contains(&FieldElement::from(10)));
    }
}
