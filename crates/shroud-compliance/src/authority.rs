//! Authority flagging workflow.
//!
//! The authority periodically screens unflagged depositors against a
//! sanctions oracle. For each hit it inserts `(record.id, masked_commitment)`
//! into the public status tree and proves that the inserted value is a genuine
//! registered masked commitment. The authority always starts from the
//! ledger's published flags, so every insertion extends the current status
//! root. The produced [`FlagTransaction`]s are returned for external
//! submission; the registry row is marked flagged once the ledger accepts one.

use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shroud_core::{
    Circuit, FieldElement, PoolConfig, ProofOutput, Prover, SharedCrypto, Witness,
};
use shroud_state::StatusFlaggedEvent;

use crate::error::ComplianceError;
use crate::registry::{MaskedCommitmentRecord, MaskedCommitmentRegistry};
use crate::smt::{InsertProof, StatusTree};

/// External boolean classifier over depositor addresses.
pub trait SanctionsOracle: Send + Sync {
    /// Whether `address` is currently sanctioned.
    fn is_sanctioned(&self, address: &str) -> Result<bool, ComplianceError>;
}

/// Fixed list of sanctioned addresses.
#[derive(Clone, Debug, Default)]
pub struct SanctionsList {
    addresses: HashSet<String>,
}

impl SanctionsList {
    /// List containing `addresses`.
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Add an address.
    pub fn add(&mut self, address: &str) {
        self.addresses.insert(address.to_string());
    }
}

impl SanctionsOracle for SanctionsList {
    fn is_sanctioned(&self, address: &str) -> Result<bool, ComplianceError> {
        Ok(self.addresses.contains(address))
    }
}

/// Flag transaction for submission to the status registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagTransaction {
    /// Status-tree key (registry id).
    pub index: u64,
    /// Flagged masked commitment.
    pub masked_commitment: FieldElement,
    /// Status-tree insertion witness.
    pub insertion: InsertProof,
    /// Flag-correctness proof.
    pub proof: ProofOutput,
}

/// The flagging authority.
pub struct Authority {
    crypto: SharedCrypto,
    registry: Arc<dyn MaskedCommitmentRegistry>,
    oracle: Arc<dyn SanctionsOracle>,
    prover: Arc<dyn Prover>,
    tree: StatusTree,
}

impl Authority {
    /// Authority for the pool in `config`, its status tree rebuilt from the
    /// ledger's `flags`.
    pub fn new(
        crypto: SharedCrypto,
        registry: Arc<dyn MaskedCommitmentRegistry>,
        oracle: Arc<dyn SanctionsOracle>,
        prover: Arc<dyn Prover>,
        config: &PoolConfig,
        flags: &[StatusFlaggedEvent],
    ) -> Result<Self, ComplianceError> {
        config.validate()?;
        let mut authority = Self {
            tree: StatusTree::new(crypto.clone(), config.status_tree_height),
            crypto,
            registry,
            oracle,
            prover,
        };
        authority.sync(flags)?;
        Ok(authority)
    }

    /// Replace the local status tree with the ledger's view.
    pub fn sync(&mut self, events: &[StatusFlaggedEvent]) -> Result<(), ComplianceError> {
        self.tree = StatusTree::from_events(self.crypto.clone(), self.tree.height(), events)?;
        debug!(flags = self.tree.len(), root = %self.tree.root(), "authority synced");
        Ok(())
    }

    /// Local status tree.
    pub fn status_tree(&self) -> &StatusTree {
        &self.tree
    }

    /// Screen every unflagged record and flag the sanctioned ones.
    pub fn scan_and_flag(&mut self) -> Result<Vec<FlagTransaction>, ComplianceError> {
        let pending = self.registry.unflagged()?;
        debug!(pending = pending.len(), "screening depositors");
        let mut out = Vec::new();
        for record in pending {
            if !self.oracle.is_sanctioned(&record.depositor)? {
                continue;
            }
            if let Some(tx) = self.flag(&record)? {
                out.push(tx);
            }
        }
        Ok(out)
    }

    /// Flag one record. Records already in the status tree yield `None`.
    pub fn flag(
        &mut self,
        record: &MaskedCommitmentRecord,
    ) -> Result<Option<FlagTransaction>, ComplianceError> {
        if record.flagged || self.tree.contains(record.id)? {
            return Ok(None);
        }

        let mut next = self.tree.clone();
        let insertion = next.insert(record.id, record.masked_commitment)?;
        let witness = flag_witness(record, &insertion);
        let proof = self.prover.prove(&witness)?;

        self.tree = next;
        info!(
            id = record.id,
            depositor = %record.depositor,
            root = %insertion.new_root,
            "flagged masked commitment"
        );
        Ok(Some(FlagTransaction {
            index: record.id,
            masked_commitment: record.masked_commitment,
            insertion,
            proof,
        }))
    }
}

fn flag_witness(record: &MaskedCommitmentRecord, ins: &InsertProof) -> Witness {
    Witness::new(Circuit::FlagCorrectness)
        .public("oldRoot", [ins.old_root])
        .public("newRoot", [ins.new_root])
        .public("key", [FieldElement::from(ins.key)])
        .public("maskedCommitment", [record.masked_commitment])
        .private("commitment", [record.commitment])
        .private("blinding", [record.blinding])
        .private("siblings", ins.siblings.iter().copied())
        .private("oldKey", [FieldElement::from(ins.old_key)])
        .private("oldValue", [ins.old_value])
        .private("isOld0", [FieldElement::from(u64::from(ins.is_old0))])
}
