//! Shielded notes (UTXOs).
//!
//! On-chain the pool stores only commitments and spent nullifiers; the
//! owner holds the opening. A note is created either freshly (deposit or
//! change output) or by decrypting a ledger payload, and is never mutated
//! afterwards except for lazily caching its commitment and nullifier.

use once_cell::sync::OnceCell;
use rand_core::OsRng;

use shroud_core::{CryptoProvider, FieldElement, Keypair, NOTE_PAYLOAD_LEN, NOTE_SEGMENT_LEN};

use crate::chainstate::Ancestry;
use crate::error::StateError;

/// A shielded note.
#[derive(Clone, Debug)]
pub struct Utxo {
    keypair: Keypair,
    amount: u64,
    blinding: FieldElement,
    index: Option<u64>,
    ancestry: Ancestry,
    commitment: OnceCell<FieldElement>,
    nullifier: OnceCell<FieldElement>,
}

impl Utxo {
    /// New unconfirmed note with a random 31-byte blinding factor.
    pub fn new(keypair: Keypair, amount: u64) -> Self {
        Self::with_parts(
            keypair,
            amount,
            FieldElement::random_with_len(&mut OsRng, NOTE_SEGMENT_LEN),
            None,
        )
    }

    /// Note from explicit parts.
    pub fn with_parts(
        keypair: Keypair,
        amount: u64,
        blinding: FieldElement,
        index: Option<u64>,
    ) -> Self {
        Self {
            keypair,
            amount,
            blinding,
            index,
            ancestry: Ancestry::None,
            commitment: OnceCell::new(),
            nullifier: OnceCell::new(),
        }
    }

    /// Zero-amount padding note owned by a throwaway keypair.
    pub fn dummy(crypto: &dyn CryptoProvider) -> Result<Self, StateError> {
        Ok(Self::new(Keypair::generate(crypto)?, 0))
    }

    /// Same note with compliance ancestry attached.
    pub fn with_ancestry(mut self, ancestry: Ancestry) -> Self {
        self.ancestry = ancestry;
        self
    }

    /// Owner keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Note value.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Blinding factor.
    pub fn blinding(&self) -> &FieldElement {
        &self.blinding
    }

    /// Leaf index, once included on the ledger.
    pub fn index(&self) -> Option<u64> {
        self.index
    }

    /// Compliance ancestry.
    pub fn ancestry(&self) -> &Ancestry {
        &self.ancestry
    }

    /// `H(amount, publicKey, blinding)`, memoized.
    pub fn commitment(&self, crypto: &dyn CryptoProvider) -> FieldElement {
        *self.commitment.get_or_init(|| {
            crypto.hash(&[
                FieldElement::from(self.amount),
                *self.keypair.public_key(),
                self.blinding,
            ])
        })
    }

    /// `H(commitment, index, sign(privateKey, commitment, index))`, memoized.
    ///
    /// Padding notes (amount zero) may lack an index or private key; funded
    /// notes may not.
    pub fn nullifier(&self, crypto: &dyn CryptoProvider) -> Result<FieldElement, StateError> {
        self.nullifier
            .get_or_try_init(|| {
                if self.amount > 0 {
                    if self.index.is_none() {
                        return Err(StateError::MissingLeafIndex);
                    }
                    if self.keypair.is_viewing_only() {
                        return Err(StateError::MissingSpendingKey);
                    }
                }
                let index = self.index.unwrap_or(0);
                let commitment = self.commitment(crypto);
                let signature = if self.keypair.is_viewing_only() {
                    FieldElement::zero()
                } else {
                    self.keypair.sign(crypto, &commitment, index)?
                };
                Ok(crypto.hash(&[commitment, FieldElement::from(index), signature]))
            })
            .copied()
    }

    /// Plaintext payload: amount and blinding, 31 bytes big-endian each.
    pub fn payload(&self) -> Result<Vec<u8>, StateError> {
        let mut bytes = FieldElement::from(self.amount).to_segment(NOTE_SEGMENT_LEN)?;
        bytes.extend(self.blinding.to_segment(NOTE_SEGMENT_LEN)?);
        Ok(bytes)
    }

    /// Payload encrypted to the owner's encryption key.
    pub fn encrypt(&self, crypto: &dyn CryptoProvider) -> Result<Vec<u8>, StateError> {
        Ok(self.keypair.encrypt(crypto, &self.payload()?)?)
    }

    /// Ancestry payload encrypted to the owner, if the note carries one.
    pub fn encrypt_ancestry(&self, crypto: &dyn CryptoProvider) -> Result<Option<Vec<u8>>, StateError> {
        match self.ancestry.to_payload()? {
            Some(plain) => Ok(Some(self.keypair.encrypt(crypto, &plain)?)),
            None => Ok(None),
        }
    }

    /// Try to open a ledger payload with `keypair`.
    ///
    /// Fails with [`shroud_core::CoreError::DecryptionMismatch`] (wrapped) for
    /// every payload not addressed to `keypair`; callers scanning the ledger
    /// should expect that for almost every event.
    pub fn decrypt(
        crypto: &dyn CryptoProvider,
        keypair: &Keypair,
        blob: &[u8],
        index: u64,
    ) -> Result<Self, StateError> {
        let plain = keypair.decrypt(crypto, blob)?;
        if plain.len() != NOTE_PAYLOAD_LEN {
            return Err(StateError::PayloadLength {
                expected: NOTE_PAYLOAD_LEN,
                got: plain.len(),
            });
        }
        let (amount_seg, blinding_seg) = plain.split_at(NOTE_SEGMENT_LEN);
        let amount = FieldElement::from_segment(amount_seg)?
            .to_u64()
            .ok_or(StateError::AmountOutOfRange)?;
        let blinding = FieldElement::from_segment(blinding_seg)?;
        Ok(Self::with_parts(keypair.clone(), amount, blinding, Some(index)))
    }

    /// Whether this error is the routine "not my note" outcome of a scan.
    pub fn is_foreign_payload(err: &StateError) -> bool {
        matches!(
            err,
            StateError::Core(shroud_core::CoreError::DecryptionMismatch)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::{Blake3Provider, PrivateKey};

    fn keypair(c: &Blake3Provider) -> Keypair {
        Keypair::generate(c).expect("keypair")
    }

    #[test]
    fn commitment_is_stable_across_calls() {
        let c = Blake3Provider;
        let u = Utxo::new(keypair(&c), 10);
        let first = u.commitment(&c);
        assert_eq!(u.commitment(&c), first);
        let expected = c.hash(&[
            FieldElement::from(10),
            *u.keypair().public_key(),
            *u.blinding(),
        ]);
        assert_eq!(first, expected);
    }

    #[test]
    fn nullifier_requires_index_and_private_key() {
        let c = Blake3Provider;
        let kp = keypair(&c);

        let unindexed = Utxo::new(kp.clone(), 5);
        assert!(matches!(unindexed.nullifier(&c), Err(StateError::MissingLeafIndex)));

        let viewing = Utxo::with_parts(kp.viewing_only(), 5, FieldElement::from(1), Some(3));
        assert!(matches!(viewing.nullifier(&c), Err(StateError::MissingSpendingKey)));

        let spendable = Utxo::with_parts(kp, 5, FieldElement::from(1), Some(3));
        let nf = spendable.nullifier(&c).expect("nullifier");
        assert_eq!(spendable.nullifier(&c).expect("nullifier"), nf);
    }

    #[test]
    fn padding_note_has_nullifier_without_index() {
        let c = Blake3Provider;
        let dummy = Utxo::dummy(&c).expect("dummy");
        assert!(dummy.nullifier(&c).is_ok());
    }

    #[test]
    fn nullifier_depends_on_index() {
        let c = Blake3Provider;
        let sk = PrivateKey::from_field(FieldElement::from(11)).expect("key");
        let kp = Keypair::from_private_key(&c, sk).expect("keypair");
        let a = Utxo::with_parts(kp.clone(), 1, FieldElement::from(2), Some(0));
        let b = Utxo::with_parts(kp, 1, FieldElement::from(2), Some(1));
        assert_eq!(a.commitment(&c), b.commitment(&c));
        assert_ne!(a.nullifier(&c).expect("nf"), b.nullifier(&c).expect("nf"));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let c = Blake3Provider;
        let kp = keypair(&c);
        let u = Utxo::new(kp.clone(), 1_000_000);
        let blob = u.encrypt(&c).expect("encrypt");

        let opened = Utxo::decrypt(&c, &kp, &blob, 7).expect("decrypt");
        assert_eq!(opened.amount(), 1_000_000);
        assert_eq!(opened.blinding(), u.blinding());
        assert_eq!(opened.index(), Some(7));
        assert_eq!(opened.commitment(&c), u.commitment(&c));

        let stranger = keypair(&c);
        let err = Utxo::decrypt(&c, &stranger, &blob, 7).expect_err("foreign");
        assert!(Utxo::is_foreign_payload(&err));
    }

    #[test]
    fn payload_is_two_fixed_segments() {
        let c = Blake3Provider;
        let u = Utxo::with_parts(keypair(&c), 258, FieldElement::from(3), None);
        let p = u.payload().expect("payload");
        assert_eq!(p.len(), NOTE_PAYLOAD_LEN);
        assert_eq!(&p[29..31], &[1, 2]);
        assert_eq!(p[61], 3);
    }
}
