//! Wallet and ledger errors.

use shroud_compliance::ComplianceError;
use shroud_core::{CoreError, FieldElement, ProverError};
use shroud_state::StateError;
use thiserror::Error;

/// Errors talking to (or applying transactions on) a ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Connection or I/O failure.
    #[error("ledger transport: {0}")]
    Transport(#[from] std::io::Error),

    /// The ledger answered with an error.
    #[error("ledger rpc error: {0}")]
    Rpc(String),

    /// The ledger answer could not be decoded.
    #[error("ledger response decode: {0}")]
    Decode(#[from] serde_json::Error),

    /// A page fetch worker stopped abnormally.
    #[error("event fetch worker failed")]
    FetchWorker,

    /// Transaction references a root the ledger never published.
    #[error("unknown merkle root {0}")]
    UnknownRoot(FieldElement),

    /// Transaction spends an already-spent nullifier.
    #[error("nullifier {0} already spent")]
    DoubleSpend(FieldElement),

    /// External data does not hash to the proven value.
    #[error("external data hash mismatch")]
    ExtDataMismatch,

    /// State update failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Registry or status-tree update failed.
    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    /// Flag insertion or exclusion proofs target a status root other than
    /// the published one.
    #[error("built on status root {got}, ledger is at {expected}")]
    StaleStatusRoot {
        /// Root the ledger holds.
        expected: FieldElement,
        /// Root the insertion started from.
        got: FieldElement,
    },

    /// Flag insertion does not match its key, value or resulting root.
    #[error("flag for status key {0} does not match its insertion")]
    FlagMismatch(u64),

    /// A deposit registration reached a ledger without a registry.
    #[error("ledger has no masked-commitment registry")]
    RegistryMissing,
}

/// Errors surfaced by wallet operations.
#[derive(Debug, Error)]
pub enum WalletError {
    /// Underlying primitive failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// UTXO or tree operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Ledger access failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Compliance bookkeeping failed (registry, status tree).
    #[error(transparent)]
    Compliance(ComplianceError),

    /// Sixteen inputs cannot cover the target.
    #[error("insufficient inputs: 16 notes hold {available}, need {target}")]
    InsufficientInputs {
        /// Requested amount.
        target: u64,
        /// Sum of the sixteen selected notes.
        available: u128,
    },

    /// The whole unspent set cannot cover the target.
    #[error("insufficient funds: have {available}, need {target}")]
    InsufficientFunds {
        /// Requested amount.
        target: u64,
        /// Total spendable balance.
        available: u128,
    },

    /// More inputs than the widest circuit accepts.
    #[error("too many inputs: {0} (at most 16)")]
    TooManyInputs(usize),

    /// More outputs than the circuit accepts.
    #[error("too many outputs: {0} (at most 2)")]
    TooManyOutputs(usize),

    /// Input commitment missing from the local tree; resync before retrying.
    #[error("commitment {0} not found in the local merkle tree")]
    CommitmentNotFoundInTree(FieldElement),

    /// The locally rebuilt root is not a root the ledger knows.
    #[error("local merkle root {0} is unknown to the ledger")]
    RootMismatch(FieldElement),

    /// An input descends from a flagged deposit.
    #[error("tainted input: descends from flagged masked commitment {masked_commitment}")]
    TaintedInput {
        /// The flagged ancestor.
        masked_commitment: FieldElement,
    },

    /// A funded input carries no compliance ancestry.
    #[error("input {0} has no compliance ancestry")]
    MissingAncestry(FieldElement),

    /// Compliance-mode deposits need a masked-commitment registry.
    #[error("compliance mode {0:?} requires a masked-commitment registry")]
    RegistryRequired(shroud_core::ComplianceMode),

    /// No registered shielded address for the ledger account.
    #[error("no shielded address registered for {0}")]
    UnknownRecipient(String),

    /// Amount arithmetic overflowed.
    #[error("amount overflow")]
    AmountOverflow,

    /// External prover failed; surfaced verbatim.
    #[error(transparent)]
    Proving(#[from] ProverError),
}

impl From<ComplianceError> for WalletError {
    fn from(e: ComplianceError) -> Self {
        match e {
            ComplianceError::Tainted { masked_commitment } => {
                WalletError::TaintedInput { masked_commitment }
            }
            ComplianceError::Prover(p) => WalletError::Proving(p),
            other => WalletError::Compliance(other),
        }
    }
}
