//! Compliance ancestry carried by a UTXO.
//!
//! Two encodings exist, matching the two compliance designs:
//!
//! - [`Ancestry::Masked`]: the exact set of masked commitments a note
//!   descends from. Each entry must later be proven absent from the status
//!   tree.
//! - [`Ancestry::Bloom`]: a fixed-size bit array where each masked commitment
//!   sets two hashed slots. Merging is bitwise OR, so bits are never cleared
//!   and taint cannot be diluted away by mixing with clean notes. The price is
//!   a false-positive rate that grows as the array fills; see
//!   [`ChainState::false_positive_rate`].

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use shroud_core::{from_bytes, to_bytes, ComplianceMode, CryptoProvider, FieldElement, BLOOM_HASH_COUNT};

use crate::error::StateError;

/// One masked-commitment ancestor: status-tree key plus masked value.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct MaskedAncestor {
    /// Registry id, used as the status-tree key.
    pub id: u64,
    /// `H(commitment, blinding)` of the depositor's first deposit.
    pub masked_commitment: FieldElement,
}

/// Fixed-size Bloom bit array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    bits: usize,
    words: Vec<u64>,
}

impl ChainState {
    /// Empty array with `bits` slots.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            words: vec![0u64; bits.div_ceil(64)],
        }
    }

    /// Slots set for `masked` in an array of `bits` slots.
    ///
    /// Slot `k` is `H(masked, c) mod bits` for the next counter `c`; a slot
    /// already taken by an earlier `k` is re-derived with the following
    /// counter, so the slots are pairwise distinct whenever
    /// `bits >= BLOOM_HASH_COUNT`.
    pub fn indices_for(
        crypto: &dyn CryptoProvider,
        masked: &FieldElement,
        bits: usize,
    ) -> [usize; BLOOM_HASH_COUNT as usize] {
        let mut out = [0usize; BLOOM_HASH_COUNT as usize];
        let mut counter = 0u64;
        for k in 0..out.len() {
            loop {
                counter += 1;
                let slot = crypto
                    .hash(&[*masked, FieldElement::from(counter)])
                    .reduce_to(bits as u64) as usize;
                if bits < out.len() || !out[..k].contains(&slot) {
                    out[k] = slot;
                    break;
                }
            }
        }
        out
    }

    /// Array with only `masked`'s slots set.
    pub fn for_masked(crypto: &dyn CryptoProvider, masked: &FieldElement, bits: usize) -> Self {
        let mut cs = Self::new(bits);
        cs.insert_masked(crypto, masked);
        cs
    }

    /// Set `masked`'s slots.
    pub fn insert_masked(&mut self, crypto: &dyn CryptoProvider, masked: &FieldElement) {
        for i in Self::indices_for(crypto, masked, self.bits) {
            self.set(i);
        }
    }

    /// Whether all of `masked`'s slots are set (possibly a false positive).
    pub fn contains_masked(&self, crypto: &dyn CryptoProvider, masked: &FieldElement) -> bool {
        Self::indices_for(crypto, masked, self.bits)
            .iter()
            .all(|i| self.get(*i))
    }

    /// Set one slot. Out-of-range slots are ignored.
    pub fn set(&mut self, slot: usize) {
        if slot < self.bits {
            self.words[slot / 64] |= 1u64 << (slot % 64);
        }
    }

    /// Read one slot.
    pub fn get(&self, slot: usize) -> bool {
        slot < self.bits && self.words[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    /// OR `other` into `self`.
    pub fn merge(&mut self, other: &ChainState) -> Result<(), StateError> {
        if other.bits != self.bits {
            return Err(StateError::ChainStateSize {
                expected: self.bits,
                got: other.bits,
            });
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= *o;
        }
        Ok(())
    }

    /// Number of set slots.
    pub fn popcount(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of slots.
    pub fn len_bits(&self) -> usize {
        self.bits
    }

    /// Whether no slot is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Probability that an unrelated masked commitment tests positive.
    pub fn false_positive_rate(&self) -> f64 {
        false_positive_rate(self.popcount(), self.bits)
    }

    /// Payload encoding: one byte (0 or 1) per slot.
    pub fn to_slot_bytes(&self) -> Vec<u8> {
        (0..self.bits).map(|i| u8::from(self.get(i))).collect()
    }

    /// Inverse of [`ChainState::to_slot_bytes`].
    pub fn from_slot_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let mut cs = Self::new(bytes.len());
        for (i, b) in bytes.iter().enumerate() {
            match *b {
                0 => {}
                1 => cs.set(i),
                other => return Err(StateError::InvalidChainStateByte(other)),
            }
        }
        Ok(cs)
    }
}

/// Estimated false-positive rate `(popcount / bits)^k` for k = 2 hash slots.
pub fn false_positive_rate(popcount: usize, bits: usize) -> f64 {
    if bits == 0 {
        return 1.0;
    }
    (popcount as f64 / bits as f64).powi(BLOOM_HASH_COUNT as i32)
}

/// Compliance ancestry attached to a UTXO.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Ancestry {
    /// Pool runs without compliance.
    #[default]
    None,
    /// Exact set of masked ancestors.
    Masked(BTreeSet<MaskedAncestor>),
    /// Bloom-encoded ancestors.
    Bloom(ChainState),
}

impl Ancestry {
    /// Ancestry of a fresh deposit under `mode`.
    pub fn for_deposit(
        crypto: &dyn CryptoProvider,
        mode: ComplianceMode,
        ancestor: MaskedAncestor,
        bloom_bits: usize,
    ) -> Self {
        match mode {
            ComplianceMode::None => Ancestry::None,
            ComplianceMode::ExactSmt => Ancestry::Masked(BTreeSet::from([ancestor])),
            ComplianceMode::ProbabilisticBloom => Ancestry::Bloom(ChainState::for_masked(
                crypto,
                &ancestor.masked_commitment,
                bloom_bits,
            )),
        }
    }

    /// Empty ancestry for `mode`.
    pub fn empty(mode: ComplianceMode, bloom_bits: usize) -> Self {
        match mode {
            ComplianceMode::None => Ancestry::None,
            ComplianceMode::ExactSmt => Ancestry::Masked(BTreeSet::new()),
            ComplianceMode::ProbabilisticBloom => Ancestry::Bloom(ChainState::new(bloom_bits)),
        }
    }

    /// Union `other` into `self`. Mixing encodings is a size mismatch.
    pub fn merge(&mut self, other: &Ancestry) -> Result<(), StateError> {
        if matches!(other, Ancestry::None) {
            return Ok(());
        }
        if matches!(self, Ancestry::None) {
            *self = other.clone();
            return Ok(());
        }
        match (self, other) {
            (Ancestry::Masked(a), Ancestry::Masked(b)) => {
                a.extend(b.iter().copied());
                Ok(())
            }
            (Ancestry::Bloom(a), Ancestry::Bloom(b)) => a.merge(b),
            (me, other) => Err(StateError::ChainStateSize {
                expected: me.bloom_bits(),
                got: other.bloom_bits(),
            }),
        }
    }

    fn bloom_bits(&self) -> usize {
        match self {
            Ancestry::Bloom(cs) => cs.len_bits(),
            _ => 0,
        }
    }

    /// Masked ancestors, when the exact encoding is used.
    pub fn masked(&self) -> Option<&BTreeSet<MaskedAncestor>> {
        match self {
            Ancestry::Masked(set) => Some(set),
            _ => None,
        }
    }

    /// Bloom chain state, when the probabilistic encoding is used.
    pub fn chain_state(&self) -> Option<&ChainState> {
        match self {
            Ancestry::Bloom(cs) => Some(cs),
            _ => None,
        }
    }

    /// Plaintext payload for `encryptedChainState`, if any.
    pub fn to_payload(&self) -> Result<Option<Vec<u8>>, StateError> {
        match self {
            Ancestry::None => Ok(None),
            Ancestry::Masked(set) => {
                let list: Vec<MaskedAncestor> = set.iter().copied().collect();
                Ok(Some(to_bytes(&list)?))
            }
            Ancestry::Bloom(cs) => Ok(Some(cs.to_slot_bytes())),
        }
    }

    /// Decode a decrypted `encryptedChainState` payload under `mode`.
    pub fn from_payload(
        mode: ComplianceMode,
        payload: &[u8],
        bloom_bits: usize,
    ) -> Result<Self, StateError> {
        match mode {
            ComplianceMode::None => Ok(Ancestry::None),
            ComplianceMode::ExactSmt => {
                let list: Vec<MaskedAncestor> =
                    from_bytes(payload).map_err(|_| StateError::InvalidAncestry)?;
                Ok(Ancestry::Masked(list.into_iter().collect()))
            }
            ComplianceMode::ProbabilisticBloom => {
                if payload.len() != bloom_bits {
                    return Err(StateError::ChainStateSize {
                        expected: bloom_bits,
                        got: payload.len(),
                    });
                }
                Ok(Ancestry::Bloom(ChainState::from_slot_bytes(payload)?))
            }
        }
    }
}
