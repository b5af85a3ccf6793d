//! Compliance status tree: a sparse Merkle tree keyed by registry id.
//!
//! Layout follows the usual compressed SMT used by circom circuits:
//!
//! - key bits are consumed least-significant first, one per level;
//! - a leaf is `H(key, value, 1)`, an internal node `H(left, right)`, an
//!   empty subtree is the zero element;
//! - a leaf sits at the shallowest depth where its key prefix is unique, so
//!   the last sibling on any path to an occupied or empty slot is non-zero.
//!
//! Exclusion proofs carry the sibling path (padded with zeros to the tree
//! height) plus the `(old_key, old_value, is_old0)` triple describing what
//! occupies the slot instead. Once a key is inserted no exclusion proof for
//! it can be produced, and every exclusion proof issued earlier stops
//! verifying against the new root.

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shroud_core::{CryptoProvider, FieldElement, SharedCrypto};
use shroud_state::{MaskedAncestor, StatusFlaggedEvent};

use crate::error::ComplianceError;

#[derive(Clone, Copy, Debug)]
enum Node {
    Leaf { key: u64, value: FieldElement },
    Internal { left: FieldElement, right: FieldElement },
}

/// Outcome of walking the tree towards a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FindResult {
    /// Whether `key` is stored.
    pub found: bool,
    /// Stored value when found.
    pub found_value: Option<FieldElement>,
    /// Siblings from the root downwards, unpadded.
    pub siblings: Vec<FieldElement>,
    /// Key of the leaf occupying the slot when not found.
    pub not_found_key: u64,
    /// Value of the leaf occupying the slot when not found.
    pub not_found_value: FieldElement,
    /// The slot is empty rather than occupied by another leaf.
    pub is_old0: bool,
}

/// Non-membership proof for one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ExclusionProof {
    /// Root the proof was built against.
    pub root: FieldElement,
    /// Key proven absent.
    pub key: u64,
    /// Siblings from the root downwards, zero-padded to the tree height.
    pub siblings: Vec<FieldElement>,
    /// Key of the leaf occupying the slot (0 when empty).
    pub old_key: u64,
    /// Value of the leaf occupying the slot (0 when empty).
    pub old_value: FieldElement,
    /// The slot is empty.
    pub is_old0: bool,
}

/// Membership proof for one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct InclusionProof {
    /// Root the proof was built against.
    pub root: FieldElement,
    /// Key proven present.
    pub key: u64,
    /// Stored value.
    pub value: FieldElement,
    /// Siblings from the root downwards, zero-padded to the tree height.
    pub siblings: Vec<FieldElement>,
}

/// Witness data of an insertion, consumed by the flag-correctness circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct InsertProof {
    /// Root before insertion.
    pub old_root: FieldElement,
    /// Root after insertion.
    pub new_root: FieldElement,
    /// Inserted key.
    pub key: u64,
    /// Inserted value.
    pub value: FieldElement,
    /// Siblings of the new leaf, zero-padded to the tree height.
    pub siblings: Vec<FieldElement>,
    /// Leaf previously occupying the slot (0 when empty).
    pub old_key: u64,
    /// Value previously occupying the slot (0 when empty).
    pub old_value: FieldElement,
    /// The slot was empty.
    pub is_old0: bool,
}

fn bit(key: u64, level: usize) -> bool {
    level < 64 && (key >> level) & 1 == 1
}

fn leaf_hash(crypto: &dyn CryptoProvider, key: u64, value: &FieldElement) -> FieldElement {
    crypto.hash(&[FieldElement::from(key), *value, FieldElement::from(1)])
}

fn pad(mut siblings: Vec<FieldElement>, height: u8) -> Vec<FieldElement> {
    siblings.resize(siblings.len().max(height as usize), FieldElement::zero());
    siblings
}

/// Fold `node` up through `siblings` (root-first order) along `key`'s bits.
/// Trailing zero siblings are padding and are skipped.
fn fold_root(crypto: &dyn CryptoProvider, key: u64, node: FieldElement, siblings: &[FieldElement]) -> FieldElement {
    let depth = siblings
        .iter()
        .rposition(|s| !s.is_zero())
        .map_or(0, |i| i + 1);
    let mut acc = node;
    for level in (0..depth).rev() {
        let sib = siblings[level];
        acc = if bit(key, level) {
            crypto.hash(&[sib, acc])
        } else {
            crypto.hash(&[acc, sib])
        };
    }
    acc
}

/// Whether `proof` shows `proof.key` holding `proof.value` under `root`.
pub fn verify_inclusion(crypto: &dyn CryptoProvider, proof: &InclusionProof, root: &FieldElement) -> bool {
    proof.root == *root
        && fold_root(
            crypto,
            proof.key,
            leaf_hash(crypto, proof.key, &proof.value),
            &proof.siblings,
        ) == *root
}

/// Whether `proof` shows `proof.key` absent under `root`.
pub fn verify_exclusion(crypto: &dyn CryptoProvider, proof: &ExclusionProof, root: &FieldElement) -> bool {
    if proof.root != *root {
        return false;
    }
    if proof.is_old0 {
        return fold_root(crypto, proof.key, FieldElement::zero(), &proof.siblings) == *root;
    }
    if proof.old_key == proof.key {
        return false;
    }
    let depth = proof
        .siblings
        .iter()
        .rposition(|s| !s.is_zero())
        .map_or(0, |i| i + 1);
    if (0..depth).any(|level| bit(proof.key, level) != bit(proof.old_key, level)) {
        return false;
    }
    let old_leaf = leaf_hash(crypto, proof.old_key, &proof.old_value);
    fold_root(crypto, proof.key, old_leaf, &proof.siblings) == *root
}

/// Public status tree of flagged masked commitments.
#[derive(Clone)]
pub struct StatusTree {
    crypto: SharedCrypto,
    height: u8,
    root: FieldElement,
    nodes: HashMap<FieldElement, Node>,
    len: usize,
}

impl StatusTree {
    /// Empty tree of `height` levels (at most 64).
    pub fn new(crypto: SharedCrypto, height: u8) -> Self {
        Self {
            crypto,
            height: height.min(64),
            root: FieldElement::zero(),
            nodes: HashMap::new(),
            len: 0,
        }
    }

    /// Tree holding every `StatusFlagged` event, in ledger order.
    pub fn from_events(
        crypto: SharedCrypto,
        height: u8,
        events: &[StatusFlaggedEvent],
    ) -> Result<Self, ComplianceError> {
        let mut tree = Self::new(crypto, height);
        for ev in events {
            match tree.insert(ev.index, ev.masked_commitment) {
                Ok(_) | Err(ComplianceError::KeyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        debug!(flagged = tree.len(), root = %tree.root(), "synced status tree");
        Ok(tree)
    }

    /// Current root.
    pub fn root(&self) -> FieldElement {
        self.root
    }

    /// Tree height.
    pub fn height(&self) -> u8 {
        self.height
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_key(&self, key: u64) -> Result<(), ComplianceError> {
        if self.height < 64 && key >> self.height != 0 {
            return Err(ComplianceError::KeyOutOfRange {
                key,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Walk towards `key`.
    pub fn find(&self, key: u64) -> Result<FindResult, ComplianceError> {
        self.check_key(key)?;
        let mut siblings = Vec::new();
        let mut node = self.root;
        let mut level = 0usize;
        loop {
            if node.is_zero() {
                return Ok(FindResult {
                    found: false,
                    found_value: None,
                    siblings,
                    not_found_key: 0,
                    not_found_value: FieldElement::zero(),
                    is_old0: true,
                });
            }
            match self.nodes.get(&node) {
                Some(Node::Leaf { key: k, value }) => {
                    let found = *k == key;
                    return Ok(FindResult {
                        found,
                        found_value: found.then_some(*value),
                        siblings,
                        not_found_key: if found { 0 } else { *k },
                        not_found_value: if found { FieldElement::zero() } else { *value },
                        is_old0: false,
                    });
                }
                Some(Node::Internal { left, right }) => {
                    if bit(key, level) {
                        siblings.push(*left);
                        node = *right;
                    } else {
                        siblings.push(*right);
                        node = *left;
                    }
                    level += 1;
                }
                None => return Err(ComplianceError::MissingNode(node)),
            }
        }
    }

    /// Whether `key` is stored.
    pub fn contains(&self, key: u64) -> Result<bool, ComplianceError> {
        Ok(self.find(key)?.found)
    }

    /// Insert `key → value`, returning the insertion witness.
    pub fn insert(&mut self, key: u64, value: FieldElement) -> Result<InsertProof, ComplianceError> {
        let found = self.find(key)?;
        if found.found {
            return Err(ComplianceError::KeyExists(key));
        }
        let old_root = self.root;
        let mut siblings = found.siblings;

        if !found.is_old0 {
            let old_key = found.not_found_key;
            let mut level = siblings.len();
            while bit(old_key, level) == bit(key, level) {
                if level + 1 >= self.height as usize {
                    return Err(ComplianceError::KeyExists(key));
                }
                siblings.push(FieldElement::zero());
                level += 1;
            }
            siblings.push(leaf_hash(self.crypto.as_ref(), old_key, &found.not_found_value));
        }

        let new_leaf = leaf_hash(self.crypto.as_ref(), key, &value);
        self.nodes.insert(new_leaf, Node::Leaf { key, value });
        let mut node = new_leaf;
        for level in (0..siblings.len()).rev() {
            let sib = siblings[level];
            let (left, right) = if bit(key, level) { (sib, node) } else { (node, sib) };
            node = self.crypto.hash(&[left, right]);
            self.nodes.insert(node, Node::Internal { left, right });
        }
        self.root = node;
        self.len += 1;

        Ok(InsertProof {
            old_root,
            new_root: self.root,
            key,
            value,
            siblings: pad(siblings, self.height),
            old_key: found.not_found_key,
            old_value: found.not_found_value,
            is_old0: found.is_old0,
        })
    }

    /// Non-membership proof for `key` against the current root.
    ///
    /// Fails with [`ComplianceError::KeyExists`] when `key` is stored; for a
    /// flagged ancestor that is the expected, unrecoverable outcome.
    pub fn prove_exclusion(&self, key: u64) -> Result<ExclusionProof, ComplianceError> {
        let found = self.find(key)?;
        if found.found {
            return Err(ComplianceError::KeyExists(key));
        }
        Ok(ExclusionProof {
            root: self.root,
            key,
            siblings: pad(found.siblings, self.height),
            old_key: found.not_found_key,
            old_value: found.not_found_value,
            is_old0: found.is_old0,
        })
    }

    /// Membership proof for `key` against the current root.
    pub fn prove_inclusion(&self, key: u64) -> Result<InclusionProof, ComplianceError> {
        let found = self.find(key)?;
        match found.found_value {
            Some(value) if found.found => Ok(InclusionProof {
                root: self.root,
                key,
                value,
                siblings: pad(found.siblings, self.height),
            }),
            _ => Err(ComplianceError::KeyAbsent(key)),
        }
    }

    /// One exclusion proof per ancestor, in ancestor order.
    ///
    /// A flagged ancestor yields [`ComplianceError::Tainted`]; no partial
    /// proof list is ever returned.
    pub fn screen_ancestors<'a>(
        &self,
        ancestors: impl IntoIterator<Item = &'a MaskedAncestor>,
    ) -> Result<Vec<ExclusionProof>, ComplianceError> {
        let mut proofs = Vec::new();
        for ancestor in ancestors {
            match self.prove_exclusion(ancestor.id) {
                Ok(p) => proofs.push(p),
                Err(ComplianceError::KeyExists(_)) => {
                    warn!(id = ancestor.id, masked = %ancestor.masked_commitment, "flagged ancestor");
                    return Err(ComplianceError::Tainted {
                        masked_commitment: ancestor.masked_commitment,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(proofs)
    }
}

impl fmt::Debug for StatusTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTree")
            .field("height", &self.height)
            .field("len", &self.len)
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shroud_core::Blake3Provider;

    fn tree() -> StatusTree {
        StatusTree::new(Blake3Provider::shared(), 20)
    }

    #[test]
    fn empty_tree_excludes_everything() {
        let c = Blake3Provider;
        let t = tree();
        let p = t.prove_exclusion(5).expect("exclusion");
        assert!(p.is_old0);
        assert_eq!(p.siblings.len(), 20);
        assert!(verify_exclusion(&c, &p, &t.root()));
        assert!(matches!(t.prove_inclusion(5), Err(ComplianceError::KeyAbsent(5))));
    }

    #[test]
    fn flagging_breaks_exclusion_and_enables_inclusion() {
        let c = Blake3Provider;
        let mut t = tree();
        t.insert(1, FieldElement::from(111)).expect("insert");
        t.insert(6, FieldElement::from(666)).expect("insert");

        let before = t.prove_exclusion(3).expect("clean key");
        assert!(verify_exclusion(&c, &before, &t.root()));

        t.insert(3, FieldElement::from(333)).expect("flag");
        assert!(!verify_exclusion(&c, &before, &t.root()));
        assert!(matches!(t.prove_exclusion(3), Err(ComplianceError::KeyExists(3))));

        let inc = t.prove_inclusion(3).expect("inclusion");
        assert_eq!(inc.value, FieldElement::from(333));
        assert!(verify_inclusion(&c, &inc, &t.root()));
    }

    #[test]
    fn collision_extends_path() {
        let c = Blake3Provider;
        let mut t = tree();
        // 0b0000 and 0b1000 share three low bits.
        t.insert(0, FieldElement::from(1)).expect("insert");
        let ins = t.insert(8, FieldElement::from(2)).expect("insert");
        assert!(!ins.is_old0);
        assert_eq!(ins.old_key, 0);
        assert_eq!(ins.old_root, {
            let mut single = tree();
            single.insert(0, FieldElement::from(1)).expect("insert");
            single.root()
        });
        for k in [0u64, 8] {
            let p = t.prove_inclusion(k).expect("inclusion");
            assert!(verify_inclusion(&c, &p, &t.root()));
        }
        let ex = t.prove_exclusion(4).expect("exclusion");
        assert!(verify_exclusion(&c, &ex, &t.root()));
    }

    #[test]
    fn forged_exclusion_with_wrong_old_leaf_fails() {
        let c = Blake3Provider;
        let mut t = tree();
        t.insert(2, FieldElement::from(9)).expect("insert");
        t.insert(5, FieldElement::from(7)).expect("insert");
        let mut p = t.prove_exclusion(3).expect("exclusion");
        p.old_value = FieldElement::from(10);
        assert!(!verify_exclusion(&c, &p, &t.root()));
    }

    #[test]
    fn key_range_and_duplicates() {
        let mut t = StatusTree::new(Blake3Provider::shared(), 4);
        assert!(matches!(
            t.insert(16, FieldElement::from(1)),
            Err(ComplianceError::KeyOutOfRange { key: 16, height: 4 })
        ));
        t.insert(3, FieldElement::from(1)).expect("insert");
        assert!(matches!(
            t.insert(3, FieldElement::from(2)),
            Err(ComplianceError::KeyExists(3))
        ));
    }

    #[test]
    fn events_replay_in_order() {
        let ev = |index: u64| StatusFlaggedEvent {
            block_number: index,
            log_index: 0,
            index,
            masked_commitment: FieldElement::from(index + 40),
        };
        let t = StatusTree::from_events(Blake3Provider::shared(), 20, &[ev(0), ev(7), ev(7)])
            .expect("sync");
        assert_eq!(t.len(), 2);
        assert!(t.contains(7).expect("find"));
    }

    #[test]
    fn screening_stops_at_flagged_ancestor() {
        let mut t = tree();
        let a = MaskedAncestor { id: 1, masked_commitment: FieldElement::from(10) };
        let b = MaskedAncestor { id: 2, masked_commitment: FieldElement::from(20) };
        assert_eq!(t.screen_ancestors([&a, &b]).expect("clean").len(), 2);

        t.insert(b.id, b.masked_commitment).expect("flag");
        assert!(matches!(
            t.screen_ancestors([&a, &b]),
            Err(ComplianceError::Tainted { masked_commitment }) if masked_commitment == b.masked_commitment
        ));
    }

    proptest! {
        #[test]
        fn proofs_hold_for_random_key_sets(keys in proptest::collection::btree_set(0u64..1024, 1..24),
                                           query in 0u64..1024) {
            let c = Blake3Provider;
            let mut t = tree();
            for k in &keys {
                t.insert(*k, FieldElement::from(*k * 3 + 1)).expect("insert");
            }
            for k in &keys {
                let p = t.prove_inclusion(*k).expect("inclusion");
                prop_assert!(verify_inclusion(&c, &p, &t.root()));
            }
            if keys.contains(&query) {
                prop_assert!(t.prove_exclusion(query).is_err());
            } else {
                let p = t.prove_exclusion(query).expect("exclusion");
                prop_assert!(verify_exclusion(&c, &p, &t.root()));
            }
        }
    }
}
