//! Error type shared by the core primitives.

/// Errors related to parsing, validation, or construction of core values.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Hex string had an unexpected byte length.
    #[error("invalid hex length: expected at most {expected} bytes, got {got} bytes")]
    InvalidHexLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Hex decoding failed.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Value is not a canonical field element (not below the modulus).
    #[error("value is not a canonical field element")]
    NonCanonicalField,

    /// Value does not fit in the requested fixed-width encoding.
    #[error("value does not fit in {0} bytes")]
    SegmentOverflow(usize),

    /// Serialized keypair decoded to the wrong number of bytes.
    #[error("invalid key length: expected {expected} bytes, got {got} bytes")]
    InvalidKeyLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes provided.
        got: usize,
    },

    /// Base58 decoding failed.
    #[error("invalid base58: {0}")]
    InvalidBase58(String),

    /// Shielded address carried an unknown prefix byte.
    #[error("invalid address prefix: 0x{0:02x}")]
    InvalidAddressPrefix(u8),

    /// Shielded address checksum did not match.
    #[error("address checksum mismatch")]
    ChecksumMismatch,

    /// Operation needs a private key but the keypair is viewing-only.
    #[error("keypair has no private key")]
    MissingPrivateKey,

    /// Private key bytes are not a usable scalar.
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Encryption key bytes are not a valid curve point.
    #[error("invalid encryption key")]
    InvalidEncryptionKey,

    /// Payload could not be decrypted with the given key.
    ///
    /// Routine when scanning: most ledger payloads belong to someone else.
    #[error("payload does not decrypt under this key")]
    DecryptionMismatch,

    /// Payload encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(&'static str),

    /// Canonical serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(&'static str),

    /// Configuration is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// Configuration file could not be read or parsed.
    #[error("config load failed: {0}")]
    ConfigLoad(String),
}
