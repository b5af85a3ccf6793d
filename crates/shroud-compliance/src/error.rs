//! Compliance errors.

use shroud_core::{CoreError, FieldElement, ProverError};
use shroud_state::StateError;
use thiserror::Error;

/// Errors produced by the registry, the status tree and the authority.
#[derive(Debug, Error)]
pub enum ComplianceError {
    /// Underlying primitive failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// State-layer encoding failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Persistent registry storage failed.
    #[error("registry storage: {0}")]
    Storage(#[from] sled::Error),

    /// The depositor already owns a masked-commitment record.
    #[error("depositor {0} is already registered")]
    AlreadyRegistered(String),

    /// A record was staged against an id another depositor has since taken.
    #[error("masked-commitment id {got} is stale; next id is {expected}")]
    IdConflict {
        /// Id the registry would assign now.
        expected: u64,
        /// Id carried by the record.
        got: u64,
    },

    /// No record with this id.
    #[error("unknown masked-commitment record {0}")]
    UnknownRecord(u64),

    /// Status-tree key does not fit the tree height.
    #[error("status key {key} exceeds a tree of height {height}")]
    KeyOutOfRange {
        /// Offending key.
        key: u64,
        /// Tree height.
        height: u8,
    },

    /// Key already present in the status tree.
    #[error("status key {0} already present")]
    KeyExists(u64),

    /// Key absent from the status tree (inclusion requested).
    #[error("status key {0} not present")]
    KeyAbsent(u64),

    /// The status tree references a node it does not store.
    #[error("status tree node {0} missing")]
    MissingNode(FieldElement),

    /// An input descends from a flagged masked commitment.
    #[error("input descends from flagged masked commitment {masked_commitment}")]
    Tainted {
        /// The flagged ancestor.
        masked_commitment: FieldElement,
    },

    /// Sanctions oracle could not classify an address.
    #[error("sanctions oracle: {0}")]
    Oracle(String),

    /// Flag-correctness proof failed.
    #[error(transparent)]
    Prover(#[from] ProverError),
}
