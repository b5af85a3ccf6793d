//! Interface to the external proving backend.
//!
//! Circuits and proof generation live outside this workspace. Callers hand a
//! structured [`Witness`] to a [`Prover`] and receive an opaque proof blob
//! plus the public signals the circuit exposes. Nothing here verifies
//! proofs on behalf of the pool.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::FieldElement;
use crate::serialization::to_bytes;

/// Domain separator for digest proofs.
const DS_DIGEST_PROOF: &[u8] = b"SHROUD::DIGEST_PROOF::V0";

/// Circuits the pool drives.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Circuit {
    /// Join-split with 2 inputs and 2 outputs.
    Transaction2x2,
    /// Join-split with 16 inputs and 2 outputs.
    Transaction16x2,
    /// Non-membership of one masked ancestor in the status tree.
    StatusExclusion,
    /// Bloom chain-state screening against flagged masked commitments.
    ChainStateScreening,
    /// Authority flag: the inserted value is a registered masked commitment.
    FlagCorrectness,
}

impl Circuit {
    /// Join-split circuit for `inputs` padded inputs, if one exists.
    pub fn for_inputs(inputs: usize) -> Option<Self> {
        match inputs {
            2 => Some(Circuit::Transaction2x2),
            16 => Some(Circuit::Transaction16x2),
            _ => None,
        }
    }
}

/// Named witness signal.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signal {
    /// Signal name as the circuit declares it.
    pub name: String,
    /// Flattened values (arrays are laid out row-major).
    pub values: Vec<FieldElement>,
}

/// Structured witness for one proof.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Witness {
    /// Target circuit.
    pub circuit: Circuit,
    /// Public signals, in declaration order.
    pub public: Vec<Signal>,
    /// Private signals.
    pub private: Vec<Signal>,
}

impl Witness {
    /// Empty witness for `circuit`.
    pub fn new(circuit: Circuit) -> Self {
        Self {
            circuit,
            public: Vec::new(),
            private: Vec::new(),
        }
    }

    /// Append a public signal.
    pub fn public(mut self, name: &str, values: impl IntoIterator<Item = FieldElement>) -> Self {
        self.public.push(Signal {
            name: name.to_string(),
            values: values.into_iter().collect(),
        });
        self
    }

    /// Append a private signal.
    pub fn private(mut self, name: &str, values: impl IntoIterator<Item = FieldElement>) -> Self {
        self.private.push(Signal {
            name: name.to_string(),
            values: values.into_iter().collect(),
        });
        self
    }

    /// All public values flattened in declaration order.
    pub fn public_values(&self) -> Vec<FieldElement> {
        self.public.iter().flat_map(|s| s.values.iter().copied()).collect()
    }
}

/// Opaque prover output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ProofOutput {
    /// Serialized proof.
    pub proof: Vec<u8>,
    /// Public signals the proof commits to.
    pub public_signals: Vec<FieldElement>,
}

/// Errors from the proving backend, surfaced verbatim.
#[derive(Debug, Error)]
pub enum ProverError {
    /// The witness does not fit the circuit.
    #[error("invalid witness for {circuit:?}: {reason}")]
    InvalidWitness {
        /// Circuit the witness targeted.
        circuit: Circuit,
        /// Backend explanation.
        reason: String,
    },

    /// The backend failed to produce a proof.
    #[error("proof generation failed: {0}")]
    Backend(String),
}

/// External zero-knowledge prover.
///
/// Proving may be slow; implementations must not retry or time out on
/// their own.
pub trait Prover: Send + Sync {
    /// Produce a proof for `witness`.
    fn prove(&self, witness: &Witness) -> Result<ProofOutput, ProverError>;
}

/// Deterministic transparent prover for development and tests.
///
/// The "proof" is a BLAKE3 digest over the circuit id and the full witness,
/// so identical witnesses yield identical proofs. It provides no
/// zero-knowledge and no soundness.
#[derive(Clone, Copy, Debug, Default)]
pub struct DigestProver;

impl DigestProver {
    fn digest(witness: &Witness) -> Result<Vec<u8>, ProverError> {
        let bytes = to_bytes(witness).map_err(|e| ProverError::Backend(e.to_string()))?;
        let mut h = blake3::Hasher::new();
        h.update(DS_DIGEST_PROOF);
        h.update(&bytes);
        Ok(h.finalize().as_bytes().to_vec())
    }
}

impl Prover for DigestProver {
    fn prove(&self, witness: &Witness) -> Result<ProofOutput, ProverError> {
        if witness.public.is_empty() {
            return Err(ProverError::InvalidWitness {
                circuit: witness.circuit,
                reason: "no public signals".to_string(),
            });
        }
        Ok(ProofOutput {
            proof: Self::digest(witness)?,
            public_signals: witness.public_values(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness(x: u64) -> Witness {
        Witness::new(Circuit::StatusExclusion)
            .public("root", [FieldElement::from(x)])
            .private("siblings", [FieldElement::from(1), FieldElement::from(2)])
    }

    #[test]
    fn digest_prover_is_deterministic() {
        let p = DigestProver;
        let a = p.prove(&witness(5)).expect("prove");
        let b = p.prove(&witness(5)).expect("prove");
        assert_eq!(a, b);
        assert_eq!(a.public_signals, vec![FieldElement::from(5)]);
        assert_ne!(a.proof, p.prove(&witness(6)).expect("prove").proof);
    }

    #[test]
    fn witness_without_public_signals_is_rejected() {
        let w = Witness::new(Circuit::FlagCorrectness);
        assert!(matches!(
            DigestProver.prove(&w),
            Err(ProverError::InvalidWitness { circuit: Circuit::FlagCorrectness, .. })
        ));
    }

    #[test]
    fn circuit_arity() {
        assert_eq!(Circuit::for_inputs(2), Some(Circuit::Transaction2x2));
        assert_eq!(Circuit::for_inputs(16), Some(Circuit::Transaction16x2));
        assert_eq!(Circuit::for_inputs(3), None);
    }
}
