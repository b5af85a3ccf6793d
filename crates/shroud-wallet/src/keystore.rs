//! Password-protected key storage.
//!
//! One sled database maps shielded addresses to sealed spending keys. A
//! sealed key is the 32-byte private key under XChaCha20-Poly1305, keyed by
//! Argon2id over the password and a per-record salt. The Argon2 costs travel
//! with the record, and the address the record is filed under is the AEAD
//! associated data: a record copied under another address does not open.

use std::path::Path;

use anyhow::{anyhow, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use borsh::{BorshDeserialize, BorshSerialize};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hex::FromHex;
use rand_core::{OsRng, RngCore};
use tracing::{debug, info};
use zeroize::Zeroizing;

use shroud_core::{CryptoProvider, FieldElement, Keypair, PrivateKey, FIELD_BYTES};

const TREE_KEYS: &str = "keys";
const TREE_META: &str = "meta";
const META_KEY: &str = "meta";

/// Prefix of the associated data every sealed key is bound to.
const SEAL_DOMAIN: &[u8] = b"SHROUD::KEYSTORE::V1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Argon2id costs a record was sealed with.
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
struct KdfParams {
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: Params::DEFAULT_M_COST,
            t_cost: Params::DEFAULT_T_COST,
            p_cost: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    fn derive(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| anyhow!("kdf parameters: {e}"))?;
        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(password.as_bytes(), salt, &mut key[..])
            .map_err(|e| anyhow!("kdf: {e}"))?;
        Ok(key)
    }
}

fn associated_data(address: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(SEAL_DOMAIN.len() + address.len());
    aad.extend_from_slice(SEAL_DOMAIN);
    aad.extend_from_slice(address.as_bytes());
    aad
}

/// Spending key sealed to one address.
#[derive(BorshSerialize, BorshDeserialize, Clone)]
struct SealedKey {
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl SealedKey {
    fn seal(secret: &[u8], password: &str, address: &str, kdf: KdfParams) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);
        let key = kdf.derive(password, &salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|e| anyhow!(e.to_string()))?;
        let aad = associated_data(address);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: secret, aad: &aad })
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(Self {
            kdf,
            salt,
            nonce,
            ciphertext,
        })
    }

    fn open(&self, password: &str, address: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.kdf.derive(password, &self.salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key[..]).map_err(|e| anyhow!(e.to_string()))?;
        let aad = associated_data(address);
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&self.nonce),
                Payload {
                    msg: &self.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| anyhow!("wrong password or key record not sealed for {address}"))?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[derive(BorshSerialize, BorshDeserialize, Default, Clone)]
struct KeystoreMeta {
    default_key: Option<String>,
}

/// Encrypted on-disk keystore.
pub struct Keystore {
    db: sled::Db,
    kdf: KdfParams,
}

impl Keystore {
    /// Open (or create) the keystore at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            kdf: KdfParams::default(),
        })
    }

    fn keys(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(TREE_KEYS)?)
    }

    fn meta(&self) -> Result<sled::Tree> {
        Ok(self.db.open_tree(TREE_META)?)
    }

    fn read_meta(&self) -> Result<KeystoreMeta> {
        match self.meta()?.get(META_KEY)? {
            Some(bytes) => Ok(KeystoreMeta::try_from_slice(&bytes)?),
            None => Ok(KeystoreMeta::default()),
        }
    }

    fn write_meta(&self, meta: &KeystoreMeta) -> Result<()> {
        self.meta()?.insert(META_KEY, borsh::to_vec(meta)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn store(&self, keypair: &Keypair, password: &str) -> Result<String> {
        let sk = keypair
            .private_key()
            .ok_or_else(|| anyhow!("cannot store a viewing-only keypair"))?;
        let address = keypair.address();
        let keys = self.keys()?;
        if keys.contains_key(address.as_bytes())? {
            return Err(anyhow!("key already present"));
        }
        let secret = Zeroizing::new(*sk.as_field().as_bytes());
        let sealed = SealedKey::seal(&secret[..], password, &address, self.kdf)?;
        keys.insert(address.as_bytes(), borsh::to_vec(&sealed)?)?;
        let mut meta = self.read_meta()?;
        if meta.default_key.is_none() {
            meta.default_key = Some(address.clone());
        }
        self.write_meta(&meta)?;
        info!(address = %address, "stored shielded key");
        Ok(address)
    }

    /// Generate and store a fresh shielded key; returns its address.
    pub fn init(&self, crypto: &dyn CryptoProvider, password: &str) -> Result<String> {
        if !self.keys()?.is_empty() {
            return Err(anyhow!("keystore already initialized"));
        }
        let keypair = Keypair::generate(crypto)?;
        self.store(&keypair, password)
    }

    /// Default shielded address.
    pub fn address(&self) -> Result<String> {
        self.read_meta()?
            .default_key
            .ok_or_else(|| anyhow!("keystore not initialized"))
    }

    fn open_key(&self, crypto: &dyn CryptoProvider, address: &str, password: &str) -> Result<Keypair> {
        let bytes = self
            .keys()?
            .get(address.as_bytes())?
            .ok_or_else(|| anyhow!("address not found in keystore"))?;
        let secret = SealedKey::try_from_slice(&bytes)?.open(password, address)?;
        let keypair = keypair_from_secret(crypto, &secret)?;
        if keypair.address() != address {
            return Err(anyhow!("key record does not derive {address}"));
        }
        debug!(address, "unsealed shielded key");
        Ok(keypair)
    }

    /// Decrypt the default key into a spending keypair.
    pub fn unlock(&self, crypto: &dyn CryptoProvider, password: &str) -> Result<Keypair> {
        let address = self.address()?;
        self.open_key(crypto, &address, password)
    }

    /// Export the default private key as hex.
    pub fn export_key_hex(&self, crypto: &dyn CryptoProvider, password: &str) -> Result<String> {
        let keypair = self.unlock(crypto, password)?;
        let sk = keypair
            .private_key()
            .ok_or_else(|| anyhow!("keystore holds a viewing-only key"))?;
        Ok(hex::encode(sk.as_field().as_bytes()))
    }

    /// Import a hex private key; returns its address.
    pub fn import_key_hex(
        &self,
        crypto: &dyn CryptoProvider,
        key_hex: &str,
        password: &str,
    ) -> Result<String> {
        let bytes = Zeroizing::new(Vec::from_hex(key_hex.trim()).map_err(|_| anyhow!("invalid hex"))?);
        let keypair = keypair_from_secret(crypto, &bytes)?;
        self.store(&keypair, password)
    }
}

fn keypair_from_secret(crypto: &dyn CryptoProvider, secret: &[u8]) -> Result<Keypair> {
    let arr: [u8; FIELD_BYTES] = secret
        .try_into()
        .map_err(|_| anyhow!("expected {FIELD_BYTES}-byte private key"))?;
    let arr = Zeroizing::new(arr);
    let field = FieldElement::from_canonical_bytes(*arr)?;
    let sk = PrivateKey::from_field(field)?;
    Ok(Keypair::from_private_key(crypto, sk)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::Blake3Provider;

    fn cheap(path: &Path) -> Keystore {
        let mut ks = Keystore::open(path).expect("open");
        ks.kdf = KdfParams {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        };
        ks
    }

    #[test]
    fn init_unlock_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Blake3Provider;
        let ks = Keystore::open(dir.path()).expect("open");
        let addr = ks.init(&c, "hunter2").expect("init");
        assert_eq!(ks.address().expect("address"), addr);
        assert!(ks.init(&c, "again").is_err());

        let kp = ks.unlock(&c, "hunter2").expect("unlock");
        assert_eq!(kp.address(), addr);
        assert!(!kp.is_viewing_only());
        assert!(ks.unlock(&c, "wrong").is_err());
    }

    #[test]
    fn record_costs_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Blake3Provider;
        let addr = cheap(dir.path()).init(&c, "pw").expect("init");
        // Reopened with default costs; the record still carries its own.
        let ks = Keystore::open(dir.path()).expect("reopen");
        assert_eq!(ks.unlock(&c, "pw").expect("unlock").address(), addr);
    }

    #[test]
    fn export_then_import_elsewhere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Blake3Provider;
        let ks = cheap(dir.path());
        let addr = ks.init(&c, "pw").expect("init");
        let exported = ks.export_key_hex(&c, "pw").expect("export");
        assert!(ks.export_key_hex(&c, "nope").is_err());
        assert!(ks.import_key_hex(&c, &exported, "pw").is_err(), "duplicate import");

        let other = tempfile::tempdir().expect("tempdir");
        let fresh = cheap(other.path());
        assert_eq!(fresh.import_key_hex(&c, &exported, "other").expect("import"), addr);
        assert_eq!(fresh.unlock(&c, "other").expect("unlock").address(), addr);
        assert!(fresh.import_key_hex(&c, "zz", "other").is_err());
        assert!(fresh.import_key_hex(&c, "00ff", "other").is_err());
    }

    #[test]
    fn sealed_key_is_bound_to_its_address() {
        let dir = tempfile::tempdir().expect("tempdir");
        let c = Blake3Provider;
        let ks = cheap(dir.path());
        let first = ks.init(&c, "pw").expect("init");
        let second_kp = Keypair::generate(&c).expect("keypair");
        let second = ks.store(&second_kp, "pw").expect("store");

        // File the first record under the second address.
        let keys = ks.keys().expect("keys");
        let moved = keys.get(first.as_bytes()).expect("get").expect("some");
        keys.insert(second.as_bytes(), moved).expect("insert");

        assert!(ks.open_key(&c, &first, "pw").is_ok());
        let err = ks.open_key(&c, &second, "pw").expect_err("moved record");
        assert!(err.to_string().contains("not sealed for"), "{err}");
    }
}
