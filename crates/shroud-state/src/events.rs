//! Ledger events consumed by the wallet.
//!
//! All event streams are append-only and ordered by block number, then by
//! emission order inside the block.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use shroud_core::FieldElement;

/// Position of an event on the ledger.
pub trait LedgerEvent {
    /// `(block_number, log_index)` sort key.
    fn position(&self) -> (u64, u32);
}

/// Sort events into canonical ledger order.
pub fn sort_events<E: LedgerEvent>(events: &mut [E]) {
    events.sort_by_key(|e| e.position());
}

/// `NewCommitment(commitment, index, encryptedOutput[, encryptedChainState])`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CommitmentEvent {
    /// Block that emitted the event.
    pub block_number: u64,
    /// Emission order inside the block.
    pub log_index: u32,
    /// Note commitment inserted into the tree.
    pub commitment: FieldElement,
    /// Leaf position in the commitment tree.
    pub index: u64,
    /// Note payload encrypted to the owner.
    #[serde(with = "hex_bytes")]
    pub encrypted_output: Vec<u8>,
    /// Compliance ancestry encrypted to the owner, when the pool carries one.
    #[serde(default, with = "hex_bytes_opt")]
    pub encrypted_chain_state: Option<Vec<u8>>,
}

impl LedgerEvent for CommitmentEvent {
    fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// `NewNullifier(nullifierHash)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct NullifierEvent {
    /// Block that emitted the event.
    pub block_number: u64,
    /// Emission order inside the block.
    pub log_index: u32,
    /// Spent nullifier.
    pub nullifier: FieldElement,
}

impl LedgerEvent for NullifierEvent {
    fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// `PublicKey(owner, pubkeyString)`: an account registered its shielded address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PublicKeyEvent {
    /// Block that emitted the event.
    pub block_number: u64,
    /// Emission order inside the block.
    pub log_index: u32,
    /// Ledger account that registered.
    pub owner: String,
    /// Serialized shielded address.
    pub address: String,
}

impl LedgerEvent for PublicKeyEvent {
    fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// `StatusFlagged(index, maskedCommitment)`: the authority flagged a masked commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct StatusFlaggedEvent {
    /// Block that emitted the event.
    pub block_number: u64,
    /// Emission order inside the block.
    pub log_index: u32,
    /// Status-tree key (masked-commitment record id).
    pub index: u64,
    /// Flagged masked commitment.
    pub masked_commitment: FieldElement,
}

impl LedgerEvent for StatusFlaggedEvent {
    fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Serde adapter encoding bytes as `0x`-prefixed hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as hex.
    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    /// Deserialize hex (with or without `0x`) into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional hex bytes.
pub mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize optional bytes as hex or null.
    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&format!("0x{}", hex::encode(b))),
            None => s.serialize_none(),
        }
    }

    /// Deserialize optional hex into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom))
            .transpose()
    }
}
