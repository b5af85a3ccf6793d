//! State-layer errors.

use shroud_core::CoreError;
use thiserror::Error;

/// Errors produced by the UTXO model, trees and chain-state encodings.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying primitive failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A funded UTXO has no ledger leaf index yet.
    #[error("nullifier needs a leaf index for a non-zero amount")]
    MissingLeafIndex,

    /// A funded UTXO is owned by a viewing-only keypair.
    #[error("nullifier needs the owner's private key for a non-zero amount")]
    MissingSpendingKey,

    /// Decrypted note payload had the wrong size.
    #[error("invalid note payload length: expected {expected} bytes, got {got} bytes")]
    PayloadLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        got: usize,
    },

    /// Decrypted amount segment does not fit a u64.
    #[error("note amount out of range")]
    AmountOutOfRange,

    /// Commitment tree has no room for another leaf.
    #[error("merkle tree is full ({capacity} leaves)")]
    TreeFull {
        /// Maximum number of leaves.
        capacity: u64,
    },

    /// Unsupported tree height.
    #[error("invalid tree height {0}")]
    InvalidTreeHeight(u8),

    /// Requested leaf does not exist.
    #[error("leaf index {0} out of range")]
    LeafOutOfRange(u64),

    /// Commitment events do not form a contiguous leaf sequence.
    #[error("leaf index gap: expected {expected}, got {got}")]
    LeafIndexGap {
        /// Next expected leaf index.
        expected: u64,
        /// Index actually observed.
        got: u64,
    },

    /// Two chain states of different sizes were combined.
    #[error("chain state size mismatch: expected {expected} bits, got {got} bits")]
    ChainStateSize {
        /// Expected number of slots.
        expected: usize,
        /// Actual number of slots.
        got: usize,
    },

    /// A chain-state slot byte was neither 0 nor 1.
    #[error("invalid chain state slot byte 0x{0:02x}")]
    InvalidChainStateByte(u8),

    /// Ancestry payload could not be decoded.
    #[error("invalid ancestry payload")]
    InvalidAncestry,
}
