// Proof-critical. Changes alter every external-data hash.
//! Canonical serialization helpers.
//!
//! Rule: anything hashed into a proof input is encoded with Borsh.
//! JSON is only used for configuration and RPC transport.

use crate::crypto::CryptoProvider;
use crate::field::FieldElement;
use crate::types::CoreError;

/// Encode a value with canonical Borsh encoding.
pub fn to_bytes<T: borsh::BorshSerialize>(v: &T) -> Result<Vec<u8>, CoreError> {
    borsh::to_vec(v).map_err(|_| CoreError::Serialization("borsh serialization failed"))
}

/// Decode a Borsh-encoded value.
pub fn from_bytes<T: borsh::BorshDeserialize>(bytes: &[u8]) -> Result<T, CoreError> {
    T::try_from_slice(bytes).map_err(|_| CoreError::Serialization("borsh decoding failed"))
}

/// Hash the canonical encoding of `v` into a field element.
pub fn hash_canonical<T: borsh::BorshSerialize>(
    crypto: &dyn CryptoProvider,
    domain: &[u8],
    v: &T,
) -> Result<FieldElement, CoreError> {
    let bytes = to_bytes(v)?;
    Ok(crypto.hash_bytes(domain, &bytes))
}
