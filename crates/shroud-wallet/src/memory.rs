//! In-process ledger.
//!
//! Plays the pool and registry contracts for local runs and tests: it checks
//! what the contracts check outside the proof (known root, external data
//! hash, unspent nullifiers, status root), appends commitments and records
//! flags. Registry rows change only here: a deposit's pending record is
//! inserted and a flag marks its row, both once the transaction is
//! accepted. Proofs are not verified. Every applied transaction mines one
//! block.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::RwLock;
use tracing::{debug, info};

use shroud_compliance::{FlagTransaction, MaskedCommitmentRegistry, StatusTree};
use shroud_core::{FieldElement, PoolConfig, SharedCrypto};
use shroud_state::{
    CommitmentEvent, MerkleTree, NullifierEvent, NullifierSet, PublicKeyEvent, StateError,
    StatusFlaggedEvent,
};

use crate::error::LedgerError;
use crate::ledger::{BlockRange, LedgerClient};
use crate::prepare::{ComplianceArtifacts, PreparedTransaction};

/// How many past roots the pool keeps accepting.
pub const ROOT_HISTORY_SIZE: usize = 30;

struct Inner {
    block: u64,
    tree: MerkleTree,
    roots: Vec<FieldElement>,
    nullifiers: NullifierSet,
    status: StatusTree,
    commitments: Vec<CommitmentEvent>,
    spent: Vec<NullifierEvent>,
    public_keys: Vec<PublicKeyEvent>,
    flags: Vec<StatusFlaggedEvent>,
}

impl Inner {
    fn next_block(&mut self) -> u64 {
        self.block += 1;
        self.block
    }

    fn push_root(&mut self) {
        self.roots.push(self.tree.root());
        if self.roots.len() > ROOT_HISTORY_SIZE {
            self.roots.remove(0);
        }
    }
}

/// Ledger held in memory.
pub struct InMemoryLedger {
    crypto: SharedCrypto,
    registry: Option<Arc<dyn MaskedCommitmentRegistry>>,
    inner: RwLock<Inner>,
}

impl InMemoryLedger {
    /// Empty ledger for the pool in `config`.
    pub fn new(crypto: SharedCrypto, config: &PoolConfig) -> Result<Self, LedgerError> {
        config.validate().map_err(StateError::from)?;
        let tree = MerkleTree::new(crypto.clone(), config.merkle_tree_height)?;
        let roots = vec![tree.root()];
        Ok(Self {
            registry: None,
            inner: RwLock::new(Inner {
                block: 0,
                tree,
                roots,
                nullifiers: NullifierSet::new(),
                status: StatusTree::new(crypto.clone(), config.status_tree_height),
                commitments: Vec::new(),
                spent: Vec::new(),
                public_keys: Vec::new(),
                flags: Vec::new(),
            }),
            crypto,
        })
    }

    /// Keep the masked-commitment registry in step with accepted transactions.
    pub fn with_registry(mut self, registry: Arc<dyn MaskedCommitmentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Apply a prepared transaction; returns the block it landed in.
    pub fn apply(&self, tx: &PreparedTransaction) -> Result<u64, LedgerError> {
        let args = &tx.args;
        let ext_hash = tx
            .ext_data
            .hash(self.crypto.as_ref())
            .map_err(|e| LedgerError::Rpc(e.to_string()))?;
        if ext_hash != args.ext_data_hash {
            return Err(LedgerError::ExtDataMismatch);
        }

        let mut inner = self.inner.write();
        if !inner.roots.contains(&args.root) {
            return Err(LedgerError::UnknownRoot(args.root));
        }
        let mut seen = HashSet::new();
        for nf in &args.input_nullifiers {
            if inner.nullifiers.contains(nf) || !seen.insert(*nf) {
                return Err(LedgerError::DoubleSpend(*nf));
            }
        }

        match &tx.compliance {
            ComplianceArtifacts::Exclusion { status_root, .. } => {
                let current = inner.status.root();
                if *status_root != current {
                    return Err(LedgerError::StaleStatusRoot {
                        expected: current,
                        got: *status_root,
                    });
                }
            }
            ComplianceArtifacts::Registration { record } => {
                let registry = self.registry.as_ref().ok_or(LedgerError::RegistryMissing)?;
                if registry.insert(record)? {
                    debug!(id = record.id, "deposit registered depositor");
                }
            }
            _ => {}
        }

        let block = inner.next_block();
        let mut log_index = 0u32;
        let payloads = [
            (&tx.ext_data.encrypted_output1, &tx.ext_data.encrypted_chain_state1),
            (&tx.ext_data.encrypted_output2, &tx.ext_data.encrypted_chain_state2),
        ];
        for (commitment, (output, chain_state)) in args.output_commitments.iter().zip(payloads) {
            let index = inner.tree.insert(*commitment)?;
            inner.commitments.push(CommitmentEvent {
                block_number: block,
                log_index,
                commitment: *commitment,
                index,
                encrypted_output: output.clone(),
                encrypted_chain_state: chain_state.clone(),
            });
            log_index += 1;
        }
        for nf in &args.input_nullifiers {
            inner.nullifiers.insert(*nf);
            inner.spent.push(NullifierEvent {
                block_number: block,
                log_index,
                nullifier: *nf,
            });
            log_index += 1;
        }
        inner.push_root();
        info!(
            block,
            ext_amount = tx.ext_data.ext_amount,
            leaves = inner.tree.len(),
            "applied transaction"
        );
        Ok(block)
    }

    /// Record a status flag.
    ///
    /// The insertion must start from the current status root and end at the
    /// root this ledger computes for it. Re-flagging a key is a no-op
    /// returning `None`.
    pub fn apply_flag(&self, tx: &FlagTransaction) -> Result<Option<u64>, LedgerError> {
        let mut inner = self.inner.write();
        if inner.status.contains(tx.index)? {
            debug!(index = tx.index, "flag already recorded");
            return Ok(None);
        }
        let current = inner.status.root();
        if tx.insertion.old_root != current {
            return Err(LedgerError::StaleStatusRoot {
                expected: current,
                got: tx.insertion.old_root,
            });
        }
        if tx.insertion.key != tx.index || tx.insertion.value != tx.masked_commitment {
            return Err(LedgerError::FlagMismatch(tx.index));
        }
        let mut next = inner.status.clone();
        let insertion = next.insert(tx.index, tx.masked_commitment)?;
        if insertion.new_root != tx.insertion.new_root {
            return Err(LedgerError::FlagMismatch(tx.index));
        }
        if let Some(registry) = &self.registry {
            registry.mark_flagged(tx.index)?;
        }

        inner.status = next;
        let block = inner.next_block();
        inner.flags.push(StatusFlaggedEvent {
            block_number: block,
            log_index: 0,
            index: tx.index,
            masked_commitment: tx.masked_commitment,
        });
        info!(block, index = tx.index, root = %insertion.new_root, "recorded status flag");
        Ok(Some(block))
    }

    /// Register `owner`'s shielded address.
    pub fn register(&self, owner: &str, address: &str) -> u64 {
        let mut inner = self.inner.write();
        let block = inner.next_block();
        inner.public_keys.push(PublicKeyEvent {
            block_number: block,
            log_index: 0,
            owner: owner.to_string(),
            address: address.to_string(),
        });
        block
    }
}

fn in_range<E: Clone>(events: &[E], range: BlockRange, block_of: impl Fn(&E) -> u64) -> Vec<E> {
    events
        .iter()
        .filter(|e| range.contains(block_of(e)))
        .cloned()
        .collect()
}

impl LedgerClient for InMemoryLedger {
    fn latest_block(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.read().block)
    }

    fn commitment_events(&self, range: BlockRange) -> Result<Vec<CommitmentEvent>, LedgerError> {
        Ok(in_range(&self.inner.read().commitments, range, |e| e.block_number))
    }

    fn nullifier_events(&self, range: BlockRange) -> Result<Vec<NullifierEvent>, LedgerError> {
        Ok(in_range(&self.inner.read().spent, range, |e| e.block_number))
    }

    fn public_key_events(&self, range: BlockRange) -> Result<Vec<PublicKeyEvent>, LedgerError> {
        Ok(in_range(&self.inner.read().public_keys, range, |e| e.block_number))
    }

    fn status_flagged_events(&self, range: BlockRange) -> Result<Vec<StatusFlaggedEvent>, LedgerError> {
        Ok(in_range(&self.inner.read().flags, range, |e| e.block_number))
    }

    fn last_root(&self) -> Result<FieldElement, LedgerError> {
        Ok(self.inner.read().tree.root())
    }

    fn is_known_root(&self, root: &FieldElement) -> Result<bool, LedgerError> {
        Ok(self.inner.read().roots.contains(root))
    }
}
