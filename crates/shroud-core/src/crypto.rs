//! Cryptographic primitives behind a narrow provider interface.
//!
//! Engine code (UTXO model, trees, transaction preparation) only talks to
//! [`CryptoProvider`]. The default [`Blake3Provider`] wires:
//!
//! - field hashing: `BLAKE3(DS || arity || x_1 || .. || x_n)` expanded to 64
//!   bytes and reduced modulo the field prime;
//! - payload encryption: ephemeral secp256k1 ECDH to the recipient's
//!   encryption key, BLAKE3 key derivation, XChaCha20-Poly1305;
//! - signing: `H(private_key, commitment, merkle_path)`, used only as
//!   nullifier entropy.
//!
//! A Poseidon-backed provider can replace it without touching callers as
//! long as it agrees with the proving circuits.

use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use k256::ecdh::{diffie_hellman, EphemeralSecret};
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::constants::*;
use crate::field::FieldElement;
use crate::keypair::{EncryptionKey, PrivateKey};
use crate::types::CoreError;

/// Poly1305 authentication tag length.
const TAG_LEN: usize = 16;

/// Hash, encrypt, decrypt and sign operations used by the pool engine.
pub trait CryptoProvider: Send + Sync {
    /// Hash a tuple of field elements into one field element.
    fn hash(&self, inputs: &[FieldElement]) -> FieldElement;

    /// Hash domain-separated bytes into a field element.
    fn hash_bytes(&self, domain: &[u8], bytes: &[u8]) -> FieldElement;

    /// Authenticated public-key encryption to `recipient`.
    fn encrypt(&self, recipient: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CoreError>;

    /// Inverse of [`CryptoProvider::encrypt`].
    ///
    /// Fails with [`CoreError::DecryptionMismatch`] for blobs addressed to
    /// another key.
    fn decrypt(&self, key: &PrivateKey, blob: &[u8]) -> Result<Vec<u8>, CoreError>;

    /// Deterministic signature over a commitment and its leaf position.
    fn sign(&self, key: &PrivateKey, commitment: &FieldElement, merkle_path: u64) -> FieldElement {
        self.hash(&[*key.as_field(), *commitment, FieldElement::from(merkle_path)])
    }
}

/// Shared handle to a provider, held by long-lived components.
pub type SharedCrypto = Arc<dyn CryptoProvider>;

/// Default provider built from BLAKE3, secp256k1 ECDH and XChaCha20-Poly1305.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3Provider;

impl Blake3Provider {
    /// Convenience constructor returning a shared handle.
    pub fn shared() -> SharedCrypto {
        Arc::new(Self)
    }
}

impl CryptoProvider for Blake3Provider {
    fn hash(&self, inputs: &[FieldElement]) -> FieldElement {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DS_FIELD_HASH);
        hasher.update(&(inputs.len() as u32).to_le_bytes());
        for x in inputs {
            hasher.update(x.as_bytes());
        }
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);
        FieldElement::from_be_bytes_mod_order(&wide)
    }

    fn hash_bytes(&self, domain: &[u8], bytes: &[u8]) -> FieldElement {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain);
        hasher.update(bytes);
        let mut wide = [0u8; 64];
        hasher.finalize_xof().fill(&mut wide);
        FieldElement::from_be_bytes_mod_order(&wide)
    }

    fn encrypt(&self, recipient: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let ephemeral_pub = EncryptionKey::from(ephemeral.public_key()).to_bytes();
        let shared = ephemeral.diffie_hellman(recipient.as_public_key());
        let key = derive_payload_key(shared.raw_secret_bytes().as_slice(), &ephemeral_pub);

        let cipher = XChaCha20Poly1305::new((&*key).into());
        let mut nonce = [0u8; PAYLOAD_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::Encryption("aead seal failed"))?;

        let mut blob = Vec::with_capacity(ENCRYPTION_KEY_LEN + PAYLOAD_NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&ephemeral_pub);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt(&self, key: &PrivateKey, blob: &[u8]) -> Result<Vec<u8>, CoreError> {
        if blob.len() < ENCRYPTION_KEY_LEN + PAYLOAD_NONCE_LEN + TAG_LEN {
            return Err(CoreError::DecryptionMismatch);
        }
        let (ephemeral_pub, rest) = blob.split_at(ENCRYPTION_KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(PAYLOAD_NONCE_LEN);

        let ephemeral =
            EncryptionKey::from_bytes(ephemeral_pub).map_err(|_| CoreError::DecryptionMismatch)?;
        let secret = key.secret_key()?;
        let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_public_key().as_affine());
        let sym = derive_payload_key(shared.raw_secret_bytes().as_slice(), ephemeral_pub);

        let cipher = XChaCha20Poly1305::new((&*sym).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::DecryptionMismatch)
    }
}

fn derive_payload_key(shared: &[u8], ephemeral_pub: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_NOTE_ENCRYPTION);
    hasher.update(shared);
    hasher.update(ephemeral_pub);
    let mut key = Zeroizing::new([0u8; 32]);
    hasher.finalize_xof().fill(&mut key[..]);
    key
}
