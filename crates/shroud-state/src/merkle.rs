//! Fixed-height append-only commitment tree.
//!
//! Every level is stored, so both the root and any leaf's authentication
//! path are available in O(height). Empty positions use a per-level zero
//! value: `zeros[0] = hash_bytes(DS_ZERO_LEAF, "")` and
//! `zeros[i + 1] = H(zeros[i], zeros[i])`.

use core::fmt;

use hashbrown::HashMap;
use tracing::debug;

use shroud_core::{CryptoProvider, FieldElement, SharedCrypto, DS_ZERO_LEAF};

use crate::error::StateError;
use crate::events::CommitmentEvent;

/// Largest supported tree height.
pub const MAX_TREE_HEIGHT: u8 = 32;

/// Authentication path for one leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    /// Leaf position.
    pub leaf_index: u64,
    /// Sibling hashes from the leaf level upwards.
    pub path_elements: Vec<FieldElement>,
    /// Bit `i` set when the node at level `i` is a right child.
    pub path_indices: u64,
}

impl MerklePath {
    /// Whether the node at `level` is the right child of its parent.
    pub fn is_right(&self, level: usize) -> bool {
        (self.path_indices >> level) & 1 == 1
    }

    /// Root obtained by hashing `leaf` up the path.
    pub fn compute_root(&self, crypto: &dyn CryptoProvider, leaf: &FieldElement) -> FieldElement {
        let mut node = *leaf;
        for (level, sibling) in self.path_elements.iter().enumerate() {
            node = if self.is_right(level) {
                crypto.hash(&[*sibling, node])
            } else {
                crypto.hash(&[node, *sibling])
            };
        }
        node
    }

    /// Whether `leaf` and this path recompute `root`.
    pub fn verify(&self, crypto: &dyn CryptoProvider, leaf: &FieldElement, root: &FieldElement) -> bool {
        self.compute_root(crypto, leaf) == *root
    }
}

/// Append-only Merkle tree over note commitments.
#[derive(Clone)]
pub struct MerkleTree {
    crypto: SharedCrypto,
    height: u8,
    zeros: Vec<FieldElement>,
    /// `layers[0]` are leaves, `layers[height]` holds at most the root.
    layers: Vec<Vec<FieldElement>>,
    positions: HashMap<FieldElement, u64>,
}

impl MerkleTree {
    /// Empty tree of `height` levels.
    pub fn new(crypto: SharedCrypto, height: u8) -> Result<Self, StateError> {
        if height == 0 || height > MAX_TREE_HEIGHT {
            return Err(StateError::InvalidTreeHeight(height));
        }
        let mut zeros = Vec::with_capacity(height as usize + 1);
        zeros.push(crypto.hash_bytes(DS_ZERO_LEAF, b""));
        for i in 0..height as usize {
            let z = zeros[i];
            zeros.push(crypto.hash(&[z, z]));
        }
        Ok(Self {
            crypto,
            height,
            zeros,
            layers: vec![Vec::new(); height as usize + 1],
            positions: HashMap::new(),
        })
    }

    /// Rebuild the tree from observed commitment events.
    ///
    /// Events are ordered by leaf index; the indices must be exactly
    /// `0..n` or the local view is missing part of the ledger.
    pub fn from_events(
        crypto: SharedCrypto,
        height: u8,
        events: &[CommitmentEvent],
    ) -> Result<Self, StateError> {
        let mut sorted: Vec<&CommitmentEvent> = events.iter().collect();
        sorted.sort_by_key(|e| e.index);

        let mut tree = Self::new(crypto, height)?;
        for ev in sorted {
            let expected = tree.len();
            if ev.index != expected {
                return Err(StateError::LeafIndexGap {
                    expected,
                    got: ev.index,
                });
            }
            tree.insert(ev.commitment)?;
        }
        debug!(leaves = tree.len(), root = %tree.root(), "rebuilt commitment tree");
        Ok(tree)
    }

    /// Tree height.
    pub fn height(&self) -> u8 {
        self.height
    }

    fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    /// Number of leaves.
    pub fn len(&self) -> u64 {
        self.layers[0].len() as u64
    }

    /// Whether no leaf was inserted.
    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    /// Append a leaf and return its index.
    pub fn insert(&mut self, leaf: FieldElement) -> Result<u64, StateError> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(StateError::TreeFull {
                capacity: self.capacity(),
            });
        }
        self.layers[0].push(leaf);
        self.positions.entry(leaf).or_insert(index);

        let mut idx = index as usize;
        for level in 1..=self.height as usize {
            idx >>= 1;
            let below = &self.layers[level - 1];
            let left = below[2 * idx];
            let right = below
                .get(2 * idx + 1)
                .copied()
                .unwrap_or(self.zeros[level - 1]);
            let node = self.crypto.hash(&[left, right]);
            let layer = &mut self.layers[level];
            if idx < layer.len() {
                layer[idx] = node;
            } else {
                layer.push(node);
            }
        }
        Ok(index)
    }

    /// Current root.
    pub fn root(&self) -> FieldElement {
        self.layers[self.height as usize]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.height as usize])
    }

    /// First leaf index holding `commitment`.
    pub fn index_of(&self, commitment: &FieldElement) -> Option<u64> {
        self.positions.get(commitment).copied()
    }

    /// Authentication path for the leaf at `index`.
    pub fn path(&self, index: u64) -> Result<MerklePath, StateError> {
        if index >= self.len() {
            return Err(StateError::LeafOutOfRange(index));
        }
        let mut path_elements = Vec::with_capacity(self.height as usize);
        let mut idx = index as usize;
        for level in 0..self.height as usize {
            let sibling = self.layers[level]
                .get(idx ^ 1)
                .copied()
                .unwrap_or(self.zeros[level]);
            path_elements.push(sibling);
            idx >>= 1;
        }
        Ok(MerklePath {
            leaf_index: index,
            path_elements,
            path_indices: index,
        })
    }
}

impl fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTree")
            .field("height", &self.height)
            .field("len", &self.len())
            .field("root", &self.root())
            .finish()
    }
}
