//! Transaction preparation.
//!
//! Deposits, transfers and withdrawals share one pipeline:
//!
//! 1. pad inputs to exactly 2 or 16 and outputs to exactly 2 with
//!    zero-amount notes of fresh keypairs;
//! 2. `ext_amount = Σ outputs − Σ inputs`, `public_amount` its field encoding;
//! 3. resolve input paths against the commitment tree (rebuilt locally and
//!    checked against the ledger whenever a funded input is spent);
//! 4. run the compliance screen for the pool's mode, aborting on taint
//!    before any proof is requested;
//! 5. encrypt outputs, hash the external data and hand the witness to the
//!    prover.
//!
//! The result is returned for external submission; nothing is verified or
//! sent from here.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shroud_compliance::{
    ExclusionProof, MaskedCommitmentRecord, MaskedCommitmentRegistry, ScreeningReport,
};
use shroud_core::{
    hash_canonical, Circuit, ComplianceMode, CryptoProvider, FieldElement, Keypair, PoolConfig,
    ProofOutput, Prover, SharedCrypto, Witness, DS_EXT_DATA, LARGE_INPUT_ARITY, OUTPUT_ARITY,
    SMALL_INPUT_ARITY,
};
use shroud_state::{hex_bytes, hex_bytes_opt, Ancestry, MerklePath, Utxo};

use crate::error::WalletError;
use crate::ledger::{LedgerClient, LedgerSnapshot};

/// What to build.
#[derive(Clone, Debug)]
pub enum TxRequest {
    /// Public funds enter the pool as one note owned by `owner`.
    Deposit {
        /// Ledger account paying in; keys the masked-commitment registry.
        depositor: String,
        /// Owner of the new note.
        owner: Keypair,
        /// Amount deposited.
        amount: u64,
    },
    /// Shielded payment to `recipient`, change back to `change`.
    Transfer {
        /// Selected notes to spend.
        inputs: Vec<Utxo>,
        /// Payee.
        recipient: Keypair,
        /// Amount paid.
        amount: u64,
        /// Owner of the change note.
        change: Keypair,
    },
    /// Funds leave the pool to a public ledger address.
    Withdrawal {
        /// Selected notes to spend.
        inputs: Vec<Utxo>,
        /// Public recipient address.
        recipient: String,
        /// Amount withdrawn.
        amount: u64,
        /// Owner of the change note.
        change: Keypair,
    },
}

/// Data bound to the proof through `ext_data_hash`.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct ExtData {
    /// Public recipient (empty for deposits and transfers).
    pub recipient: String,
    /// Signed public delta: positive for deposits, negative for withdrawals.
    pub ext_amount: i128,
    /// First output payload.
    #[serde(with = "hex_bytes")]
    pub encrypted_output1: Vec<u8>,
    /// Second output payload.
    #[serde(with = "hex_bytes")]
    pub encrypted_output2: Vec<u8>,
    /// First output's encrypted chain state.
    #[serde(default, with = "hex_bytes_opt")]
    pub encrypted_chain_state1: Option<Vec<u8>>,
    /// Second output's encrypted chain state.
    #[serde(default, with = "hex_bytes_opt")]
    pub encrypted_chain_state2: Option<Vec<u8>>,
}

impl ExtData {
    /// `H(borsh(self))` reduced into the field.
    pub fn hash(&self, crypto: &dyn CryptoProvider) -> Result<FieldElement, WalletError> {
        Ok(hash_canonical(crypto, DS_EXT_DATA, self)?)
    }
}

/// Public arguments of the pool's `transact` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactArgs {
    /// Join-split proof.
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    /// Commitment-tree root proven against.
    pub root: FieldElement,
    /// One nullifier per padded input.
    pub input_nullifiers: Vec<FieldElement>,
    /// Exactly two output commitments.
    pub output_commitments: [FieldElement; OUTPUT_ARITY],
    /// `(ext_amount + p) mod p`.
    pub public_amount: FieldElement,
    /// Hash of the external data.
    pub ext_data_hash: FieldElement,
}

/// Compliance material accompanying a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum ComplianceArtifacts {
    /// Plain pool.
    None,
    /// Deposit carries the depositor's masked commitment.
    Registration {
        /// Existing row, or the row the ledger writes once the deposit lands.
        record: MaskedCommitmentRecord,
    },
    /// One exclusion proof per masked ancestor.
    Exclusion {
        /// Status-tree root the proofs target.
        status_root: FieldElement,
        /// Tree-level exclusion witnesses.
        exclusions: Vec<ExclusionProof>,
        /// Circuit proofs, one per exclusion.
        proofs: Vec<ProofOutput>,
    },
    /// Merged Bloom chain state passed the flagged-entry screen.
    Screening {
        /// Screen summary.
        report: ScreeningReport,
        /// Screening circuit proof.
        proof: ProofOutput,
    },
}

/// Everything needed to submit a transaction.
#[derive(Clone, Debug)]
pub struct PreparedTransaction {
    /// `transact` arguments.
    pub args: TransactArgs,
    /// External data.
    pub ext_data: ExtData,
    /// Compliance proofs or registration.
    pub compliance: ComplianceArtifacts,
    /// The two padded outputs, unconfirmed.
    pub outputs: Vec<Utxo>,
    /// Funded inputs being spent.
    pub spent: Vec<Utxo>,
}

struct Shape {
    inputs: Vec<Utxo>,
    outputs: Vec<Utxo>,
    recipient: String,
    depositor: Option<String>,
}

fn sum(notes: &[Utxo]) -> u128 {
    notes.iter().map(|u| u128::from(u.amount())).sum()
}

/// Builds witnesses and drives the prover.
pub struct TransactionPreparer {
    config: PoolConfig,
    crypto: SharedCrypto,
    prover: Arc<dyn Prover>,
    registry: Option<Arc<dyn MaskedCommitmentRegistry>>,
}

impl TransactionPreparer {
    /// Preparer for `config`. Compliance-mode deposits need `registry`,
    /// which is only read.
    pub fn new(
        config: PoolConfig,
        crypto: SharedCrypto,
        prover: Arc<dyn Prover>,
        registry: Option<Arc<dyn MaskedCommitmentRegistry>>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        Ok(Self {
            config,
            crypto,
            prover,
            registry,
        })
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn shape(&self, request: TxRequest) -> Result<Shape, WalletError> {
        match request {
            TxRequest::Deposit {
                depositor,
                owner,
                amount,
            } => Ok(Shape {
                inputs: Vec::new(),
                outputs: vec![Utxo::new(owner, amount)],
                recipient: String::new(),
                depositor: Some(depositor),
            }),
            TxRequest::Transfer {
                inputs,
                recipient,
                amount,
                change,
            } => {
                let change_amount = change_amount(&inputs, amount)?;
                Ok(Shape {
                    outputs: vec![Utxo::new(recipient, amount), Utxo::new(change, change_amount)],
                    inputs,
                    recipient: String::new(),
                    depositor: None,
                })
            }
            TxRequest::Withdrawal {
                inputs,
                recipient,
                amount,
                change,
            } => {
                let change_amount = change_amount(&inputs, amount)?;
                Ok(Shape {
                    outputs: vec![Utxo::new(change, change_amount)],
                    inputs,
                    recipient,
                    depositor: None,
                })
            }
        }
    }

    /// Prepare `request` against `snapshot`, consulting `ledger` for roots.
    pub fn prepare(
        &self,
        request: TxRequest,
        snapshot: &LedgerSnapshot,
        ledger: &dyn LedgerClient,
    ) -> Result<PreparedTransaction, WalletError> {
        let crypto = self.crypto.as_ref();
        let Shape {
            mut inputs,
            mut outputs,
            recipient,
            depositor,
        } = self.shape(request)?;
        let spent: Vec<Utxo> = inputs.iter().filter(|u| u.amount() > 0).cloned().collect();

        // Compliance runs first so a tainted spend never reaches the prover.
        let (ancestry, compliance) =
            self.compliance(&inputs, &outputs, depositor.as_deref(), snapshot)?;

        let arity = if inputs.len() <= SMALL_INPUT_ARITY {
            SMALL_INPUT_ARITY
        } else if inputs.len() <= LARGE_INPUT_ARITY {
            LARGE_INPUT_ARITY
        } else {
            return Err(WalletError::TooManyInputs(inputs.len()));
        };
        if outputs.len() > OUTPUT_ARITY {
            return Err(WalletError::TooManyOutputs(outputs.len()));
        }
        while inputs.len() < arity {
            inputs.push(Utxo::dummy(crypto)?);
        }
        while outputs.len() < OUTPUT_ARITY {
            outputs.push(Utxo::dummy(crypto)?);
        }
        let outputs: Vec<Utxo> = outputs
            .into_iter()
            .map(|u| u.with_ancestry(ancestry.clone()))
            .collect();

        let ext_amount = i128::try_from(sum(&outputs))
            .ok()
            .zip(i128::try_from(sum(&inputs)).ok())
            .map(|(o, i)| o - i)
            .ok_or(WalletError::AmountOverflow)?;
        let public_amount = FieldElement::from_signed(ext_amount);

        let (root, paths) = self.resolve_paths(&inputs, snapshot, ledger)?;

        let ext_data = ExtData {
            recipient,
            ext_amount,
            encrypted_output1: outputs[0].encrypt(crypto)?,
            encrypted_output2: outputs[1].encrypt(crypto)?,
            encrypted_chain_state1: outputs[0].encrypt_ancestry(crypto)?,
            encrypted_chain_state2: outputs[1].encrypt_ancestry(crypto)?,
        };
        let ext_data_hash = ext_data.hash(crypto)?;

        let input_nullifiers = inputs
            .iter()
            .map(|u| u.nullifier(crypto))
            .collect::<Result<Vec<_>, _>>()?;
        let output_commitments = [outputs[0].commitment(crypto), outputs[1].commitment(crypto)];

        let circuit =
            Circuit::for_inputs(inputs.len()).ok_or(WalletError::TooManyInputs(inputs.len()))?;
        let witness = transaction_witness(
            circuit,
            TransactionPublics {
                root,
                public_amount,
                ext_data_hash,
                input_nullifiers: &input_nullifiers,
                output_commitments: &output_commitments,
            },
            &inputs,
            &paths,
            &outputs,
        );
        let proof = self.prover.prove(&witness)?;

        info!(
            inputs = spent.len(),
            arity,
            ext_amount,
            root = %root,
            "prepared transaction"
        );
        Ok(PreparedTransaction {
            args: TransactArgs {
                proof: proof.proof,
                root,
                input_nullifiers,
                output_commitments,
                public_amount,
                ext_data_hash,
            },
            ext_data,
            compliance,
            outputs,
            spent,
        })
    }

    /// Root to prove against plus one path per padded input.
    fn resolve_paths(
        &self,
        inputs: &[Utxo],
        snapshot: &LedgerSnapshot,
        ledger: &dyn LedgerClient,
    ) -> Result<(FieldElement, Vec<MerklePath>), WalletError> {
        let height = self.config.merkle_tree_height;
        let zero_path = || MerklePath {
            leaf_index: 0,
            path_elements: vec![FieldElement::zero(); height as usize],
            path_indices: 0,
        };

        if inputs.iter().all(|u| u.amount() == 0) {
            // Nothing is spent: the latest published root is trusted as is.
            let root = ledger.last_root()?;
            return Ok((root, inputs.iter().map(|_| zero_path()).collect()));
        }

        let tree = snapshot.commitment_tree(self.crypto.clone(), height)?;
        let root = tree.root();
        if !ledger.is_known_root(&root)? {
            return Err(WalletError::RootMismatch(root));
        }
        let mut paths = Vec::with_capacity(inputs.len());
        for u in inputs {
            if u.amount() == 0 {
                paths.push(zero_path());
                continue;
            }
            let commitment = u.commitment(self.crypto.as_ref());
            let index = tree
                .index_of(&commitment)
                .filter(|i| u.index() == Some(*i))
                .ok_or(WalletError::CommitmentNotFoundInTree(commitment))?;
            paths.push(tree.path(index)?);
        }
        debug!(root = %root, leaves = tree.len(), "resolved input paths");
        Ok((root, paths))
    }

    /// Ancestry for the outputs plus the compliance artifacts.
    fn compliance(
        &self,
        inputs: &[Utxo],
        outputs: &[Utxo],
        depositor: Option<&str>,
        snapshot: &LedgerSnapshot,
    ) -> Result<(Ancestry, ComplianceArtifacts), WalletError> {
        let mode = self.config.compliance_mode;
        let bits = self.config.bloom_filter_bits;
        let crypto = self.crypto.as_ref();
        if mode == ComplianceMode::None {
            return Ok((Ancestry::None, ComplianceArtifacts::None));
        }

        if let Some(depositor) = depositor {
            let registry = self.registry.as_ref().ok_or(WalletError::RegistryRequired(mode))?;
            let Some(note) = outputs.first() else {
                return Ok((Ancestry::empty(mode, bits), ComplianceArtifacts::None));
            };
            let record =
                registry.pending(crypto, depositor, note.commitment(crypto), *note.blinding())?;
            let ancestry = Ancestry::for_deposit(crypto, mode, record.ancestor(), bits);
            return Ok((ancestry, ComplianceArtifacts::Registration { record }));
        }

        let mut merged = Ancestry::empty(mode, bits);
        for u in inputs.iter().filter(|u| u.amount() > 0) {
            if matches!(u.ancestry(), Ancestry::None) {
                return Err(WalletError::MissingAncestry(u.commitment(crypto)));
            }
            merged.merge(u.ancestry())?;
        }

        match (&merged, mode) {
            (Ancestry::Masked(ancestors), ComplianceMode::ExactSmt) => {
                let tree = snapshot.status_tree(self.crypto.clone(), self.config.status_tree_height)?;
                let exclusions = tree.screen_ancestors(ancestors)?;
                let mut proofs = Vec::with_capacity(exclusions.len());
                for ex in &exclusions {
                    proofs.push(self.prover.prove(&exclusion_witness(ex))?);
                }
                debug!(ancestors = exclusions.len(), "exclusion proofs built");
                Ok((
                    merged.clone(),
                    ComplianceArtifacts::Exclusion {
                        status_root: tree.root(),
                        exclusions,
                        proofs,
                    },
                ))
            }
            (Ancestry::Bloom(state), ComplianceMode::ProbabilisticBloom) => {
                let screen = snapshot.bloom_screen(self.crypto.clone(), bits);
                let report = screen.screen(state)?;
                let witness = Witness::new(Circuit::ChainStateScreening)
                    .public("flagged", screen.flagged().iter().copied())
                    .private(
                        "chainState",
                        state
                            .to_slot_bytes()
                            .into_iter()
                            .map(|b| FieldElement::from(u64::from(b))),
                    );
                let proof = self.prover.prove(&witness)?;
                Ok((merged.clone(), ComplianceArtifacts::Screening { report, proof }))
            }
            _ => Ok((merged.clone(), ComplianceArtifacts::None)),
        }
    }
}

fn change_amount(inputs: &[Utxo], amount: u64) -> Result<u64, WalletError> {
    let total = sum(inputs);
    if total < u128::from(amount) {
        return Err(WalletError::InsufficientFunds {
            target: amount,
            available: total,
        });
    }
    u64::try_from(total - u128::from(amount)).map_err(|_| WalletError::AmountOverflow)
}

struct TransactionPublics<'a> {
    root: FieldElement,
    public_amount: FieldElement,
    ext_data_hash: FieldElement,
    input_nullifiers: &'a [FieldElement],
    output_commitments: &'a [FieldElement],
}

fn transaction_witness(
    circuit: Circuit,
    publics: TransactionPublics<'_>,
    inputs: &[Utxo],
    paths: &[MerklePath],
    outputs: &[Utxo],
) -> Witness {
    Witness::new(circuit)
        .public("root", [publics.root])
        .public("publicAmount", [publics.public_amount])
        .public("extDataHash", [publics.ext_data_hash])
        .public("inputNullifier", publics.input_nullifiers.iter().copied())
        .public("outputCommitment", publics.output_commitments.iter().copied())
        .private("inAmount", inputs.iter().map(|u| FieldElement::from(u.amount())))
        .private(
            "inPrivateKey",
            inputs.iter().map(|u| {
                u.keypair()
                    .private_key()
                    .map(|k| *k.as_field())
                    .unwrap_or_else(FieldElement::zero)
            }),
        )
        .private("inBlinding", inputs.iter().map(|u| *u.blinding()))
        .private("inPathIndices", paths.iter().map(|p| FieldElement::from(p.path_indices)))
        .private(
            "inPathElements",
            paths.iter().flat_map(|p| p.path_elements.iter().copied()),
        )
        .private("outAmount", outputs.iter().map(|u| FieldElement::from(u.amount())))
        .private("outPubkey", outputs.iter().map(|u| *u.keypair().public_key()))
        .private("outBlinding", outputs.iter().map(|u| *u.blinding()))
}

fn exclusion_witness(ex: &ExclusionProof) -> Witness {
    Witness::new(Circuit::StatusExclusion)
        .public("root", [ex.root])
        .public("key", [FieldElement::from(ex.key)])
        .private("siblings", ex.siblings.iter().copied())
        .private("oldKey", [FieldElement::from(ex.old_key)])
        .private("oldValue", [ex.old_value])
        .private("isOld0", [FieldElement::from(u64::from(ex.is_old0))])
}
