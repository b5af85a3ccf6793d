//! Protocol-wide constants for the shroud pool.

/// Length in bytes of a canonical field element encoding.
pub const FIELD_BYTES: usize = 32;

/// Hexadecimal BN254 scalar field modulus (the proving field).
pub const FIELD_PRIME_HEX: &str =
    "30644e72e131a029b85045b68181585d2833e84879b9709143e1f593f0000001";

/// Length in bytes of a compressed secp256k1 encryption key.
pub const ENCRYPTION_KEY_LEN: usize = 33;

/// Length in bytes of the nonce prepended to every encrypted payload.
pub const PAYLOAD_NONCE_LEN: usize = 24;

/// Version prefix byte of a serialized shielded address.
pub const SHIELDED_ADDRESS_PREFIX: u8 = 0x53;

/// Checksum length appended to a serialized shielded address.
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Decoded length of a shielded address:
/// prefix || public key || encryption key || checksum.
pub const SHIELDED_ADDRESS_LEN: usize =
    1 + FIELD_BYTES + ENCRYPTION_KEY_LEN + ADDRESS_CHECKSUM_LEN;

/// Width in bytes of each segment of an encrypted note payload.
///
/// Amount and blinding are each encoded big-endian in 31 bytes so that both
/// always fit below the field modulus.
pub const NOTE_SEGMENT_LEN: usize = 31;

/// Byte length of the plaintext note payload (amount || blinding).
pub const NOTE_PAYLOAD_LEN: usize = 2 * NOTE_SEGMENT_LEN;

/// Default height of the commitment Merkle tree (2^20 leaves).
pub const DEFAULT_MERKLE_TREE_HEIGHT: u8 = 20;

/// Default height of the compliance status sparse Merkle tree.
pub const DEFAULT_STATUS_TREE_HEIGHT: u8 = 20;

/// Default size of the Bloom chain-state bit array.
pub const DEFAULT_BLOOM_FILTER_BITS: usize = 16_384;

/// Number of bit indices set per masked commitment in a Bloom chain state.
pub const BLOOM_HASH_COUNT: u64 = 2;

/// Arity of a two-input transaction shape.
pub const SMALL_INPUT_ARITY: usize = 2;

/// Arity of a sixteen-input transaction shape.
pub const LARGE_INPUT_ARITY: usize = 16;

/// Every transaction carries exactly this many outputs.
pub const OUTPUT_ARITY: usize = 2;

/// Domain separator for field hashing of field-element tuples.
pub const DS_FIELD_HASH: &[u8] = b"SHROUD::FIELD_HASH::V0";

/// Domain separator for the external-data hash.
pub const DS_EXT_DATA: &[u8] = b"SHROUD::EXT_DATA::V0";

/// Domain separator for the Merkle tree zero leaf.
pub const DS_ZERO_LEAF: &[u8] = b"SHROUD::ZERO_LEAF::V0";

/// Key-derivation context for note payload encryption.
pub const KDF_NOTE_ENCRYPTION: &str = "shroud 2024-06 note payload encryption v0";

/// Domain separator for address checksums.
pub const DS_ADDRESS_CHECKSUM: &[u8] = b"SHROUD::ADDRESS_CHECKSUM::V0";
