//! Shielded identities.
//!
//! A [`Keypair`] owns notes in the pool. `public_key = H(private_key)` goes
//! into commitments; `encryption_key` (secp256k1 point of the same scalar)
//! receives encrypted note payloads. A keypair parsed from an address is
//! viewing-only: it can be paid, but cannot decrypt or sign.

use core::fmt;
use core::str::FromStr;

use bs58::{decode as b58decode, encode as b58encode};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand_core::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::*;
use crate::crypto::CryptoProvider;
use crate::field::FieldElement;
use crate::types::CoreError;

/// Secret scalar of a shielded identity.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(FieldElement);

impl PrivateKey {
    /// Draw a fresh non-zero private key.
    pub fn random() -> Self {
        loop {
            let candidate = FieldElement::random(&mut OsRng);
            if !candidate.is_zero() {
                return Self(candidate);
            }
        }
    }

    /// Wrap an existing field element; zero is rejected.
    pub fn from_field(value: FieldElement) -> Result<Self, CoreError> {
        if value.is_zero() {
            return Err(CoreError::InvalidPrivateKey);
        }
        Ok(Self(value))
    }

    /// The scalar as a field element.
    pub fn as_field(&self) -> &FieldElement {
        &self.0
    }

    /// The same scalar as a secp256k1 secret key.
    ///
    /// Every non-zero element of the proving field is below the secp256k1
    /// group order, so the conversion only fails for corrupted input.
    pub fn secret_key(&self) -> Result<SecretKey, CoreError> {
        SecretKey::from_slice(self.0.as_bytes()).map_err(|_| CoreError::InvalidPrivateKey)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Compressed secp256k1 point that note payloads are encrypted to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EncryptionKey(PublicKey);

impl EncryptionKey {
    /// Parse a compressed (or uncompressed) SEC1 encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CoreError::InvalidEncryptionKey)
    }

    /// Compressed SEC1 encoding.
    pub fn to_bytes(&self) -> [u8; ENCRYPTION_KEY_LEN] {
        let point = self.0.to_encoded_point(true);
        let mut out = [0u8; ENCRYPTION_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// The underlying curve point.
    pub fn as_public_key(&self) -> &PublicKey {
        &self.0
    }
}

impl From<PublicKey> for EncryptionKey {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

/// Owner identity of shielded notes.
#[derive(Clone)]
pub struct Keypair {
    private_key: Option<PrivateKey>,
    public_key: FieldElement,
    encryption_key: EncryptionKey,
}

impl Keypair {
    /// Generate a fresh keypair from OS randomness.
    pub fn generate(crypto: &dyn CryptoProvider) -> Result<Self, CoreError> {
        Self::from_private_key(crypto, PrivateKey::random())
    }

    /// Derive the public halves from a private key.
    pub fn from_private_key(
        crypto: &dyn CryptoProvider,
        private_key: PrivateKey,
    ) -> Result<Self, CoreError> {
        let public_key = crypto.hash(&[*private_key.as_field()]);
        let encryption_key = EncryptionKey(private_key.secret_key()?.public_key());
        Ok(Self {
            private_key: Some(private_key),
            public_key,
            encryption_key,
        })
    }

    /// Parse a viewing-only keypair from its serialized address.
    pub fn from_address(address: &str) -> Result<Self, CoreError> {
        let bytes = b58decode(address)
            .into_vec()
            .map_err(|e| CoreError::InvalidBase58(e.to_string()))?;
        if bytes.len() != SHIELDED_ADDRESS_LEN {
            return Err(CoreError::InvalidKeyLength {
                expected: SHIELDED_ADDRESS_LEN,
                got: bytes.len(),
            });
        }
        if bytes[0] != SHIELDED_ADDRESS_PREFIX {
            return Err(CoreError::InvalidAddressPrefix(bytes[0]));
        }
        let (payload, checksum) = bytes.split_at(SHIELDED_ADDRESS_LEN - ADDRESS_CHECKSUM_LEN);
        if checksum4(payload) != checksum[..ADDRESS_CHECKSUM_LEN] {
            return Err(CoreError::ChecksumMismatch);
        }

        let mut pk = [0u8; FIELD_BYTES];
        pk.copy_from_slice(&payload[1..1 + FIELD_BYTES]);
        let public_key = FieldElement::from_canonical_bytes(pk)?;
        let encryption_key = EncryptionKey::from_bytes(&payload[1 + FIELD_BYTES..])?;
        Ok(Self {
            private_key: None,
            public_key,
            encryption_key,
        })
    }

    /// Canonical serialization; inverse of [`Keypair::from_address`].
    pub fn address(&self) -> String {
        let mut payload = Vec::with_capacity(SHIELDED_ADDRESS_LEN);
        payload.push(SHIELDED_ADDRESS_PREFIX);
        payload.extend_from_slice(self.public_key.as_bytes());
        payload.extend_from_slice(&self.encryption_key.to_bytes());
        let checksum = checksum4(&payload);
        payload.extend_from_slice(&checksum);
        b58encode(payload).into_string()
    }

    /// Commitment-facing public key.
    pub fn public_key(&self) -> &FieldElement {
        &self.public_key
    }

    /// Payload encryption key.
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    /// Private key, absent for viewing-only keypairs.
    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    /// Whether this keypair was reconstructed from an address.
    pub fn is_viewing_only(&self) -> bool {
        self.private_key.is_none()
    }

    /// Copy without the private key.
    pub fn viewing_only(&self) -> Self {
        Self {
            private_key: None,
            public_key: self.public_key,
            encryption_key: self.encryption_key,
        }
    }

    /// Encrypt bytes to this keypair's encryption key.
    pub fn encrypt(&self, crypto: &dyn CryptoProvider, bytes: &[u8]) -> Result<Vec<u8>, CoreError> {
        crypto.encrypt(&self.encryption_key, bytes)
    }

    /// Decrypt a blob addressed to this keypair.
    pub fn decrypt(&self, crypto: &dyn CryptoProvider, blob: &[u8]) -> Result<Vec<u8>, CoreError> {
        let key = self.private_key.as_ref().ok_or(CoreError::MissingPrivateKey)?;
        crypto.decrypt(key, blob)
    }

    /// Nullifier-entropy signature over `commitment` at leaf `merkle_path`.
    pub fn sign(
        &self,
        crypto: &dyn CryptoProvider,
        commitment: &FieldElement,
        merkle_path: u64,
    ) -> Result<FieldElement, CoreError> {
        let key = self.private_key.as_ref().ok_or(CoreError::MissingPrivateKey)?;
        Ok(crypto.sign(key, commitment, merkle_path))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .field("viewing_only", &self.is_viewing_only())
            .finish()
    }
}

impl fmt::Display for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl FromStr for Keypair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_address(s)
    }
}

fn checksum4(data: &[u8]) -> [u8; ADDRESS_CHECKSUM_LEN] {
    let mut h = blake3::Hasher::new();
    h.update(DS_ADDRESS_CHECKSUM);
    h.update(data);
    let mut out = [0u8; ADDRESS_CHECKSUM_LEN];
    h.finalize_xof().fill(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Blake3Provider;

    #[test]
    fn address_round_trip_is_viewing_only() {
        let c = Blake3Provider;
        let kp = Keypair::generate(&c).expect("keypair");
        let parsed = Keypair::from_address(&kp.address()).expect("parse");
        assert!(parsed.is_viewing_only());
        assert_eq!(parsed.public_key(), kp.public_key());
        assert_eq!(parsed.address(), kp.address());
        assert!(matches!(
            parsed.decrypt(&c, &[0u8; 80]),
            Err(CoreError::MissingPrivateKey)
        ));
        assert!(matches!(
            parsed.sign(&c, &FieldElement::from(1), 0),
            Err(CoreError::MissingPrivateKey)
        ));
    }

    #[test]
    fn public_halves_are_deterministic() {
        let c = Blake3Provider;
        let sk = PrivateKey::from_field(FieldElement::from(42)).expect("nonzero");
        let a = Keypair::from_private_key(&c, sk.clone()).expect("keypair");
        let b = Keypair::from_private_key(&c, sk).expect("keypair");
        assert_eq!(a.address(), b.address());
        assert_eq!(*a.public_key(), c.hash(&[FieldElement::from(42)]));
    }

    #[test]
    fn truncated_address_is_invalid_key_length() {
        let c = Blake3Provider;
        let kp = Keypair::generate(&c).expect("keypair");
        let mut raw = b58decode(kp.address()).into_vec().expect("b58");
        raw.truncate(SHIELDED_ADDRESS_LEN - 1);
        let short = b58encode(raw).into_string();
        assert!(matches!(
            Keypair::from_address(&short),
            Err(CoreError::InvalidKeyLength { expected, got })
                if expected == SHIELDED_ADDRESS_LEN && got == SHIELDED_ADDRESS_LEN - 1
        ));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let c = Blake3Provider;
        let kp = Keypair::generate(&c).expect("keypair");
        let mut raw = b58decode(kp.address()).into_vec().expect("b58");
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let bad = b58encode(raw).into_string();
        assert!(matches!(
            Keypair::from_address(&bad),
            Err(CoreError::ChecksumMismatch)
        ));
    }

    #[test]
    fn zero_private_key_is_rejected() {
        assert!(PrivateKey::from_field(FieldElement::zero()).is_err());
    }
}
