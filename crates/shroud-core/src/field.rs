//! Scalar field elements.
//!
//! Every hash, commitment, nullifier and Merkle node lives in the BN254
//! scalar field used by the proving circuits. Values are kept in a canonical
//! 32-byte big-endian encoding strictly below [`field_prime`], so equality,
//! hashing and ordering on the bytes agree with equality and ordering of the
//! integers.

use core::fmt;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use num_bigint::BigUint;
use num_traits::Zero;
use once_cell::sync::Lazy;
use rand_core::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::constants::{FIELD_BYTES, FIELD_PRIME_HEX};
use crate::types::CoreError;

static FIELD_PRIME: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(FIELD_PRIME_HEX.as_bytes(), 16).unwrap_or_default()
});

/// The scalar field modulus.
pub fn field_prime() -> &'static BigUint {
    &FIELD_PRIME
}

/// Canonical element of the scalar field.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct FieldElement([u8; FIELD_BYTES]);

impl FieldElement {
    /// The additive identity.
    pub const fn zero() -> Self {
        Self([0u8; FIELD_BYTES])
    }

    /// Whether this is the zero element.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Returns the canonical big-endian bytes.
    pub const fn as_bytes(&self) -> &[u8; FIELD_BYTES] {
        &self.0
    }

    /// Parse canonical big-endian bytes, rejecting values at or above the modulus.
    pub fn from_canonical_bytes(bytes: [u8; FIELD_BYTES]) -> Result<Self, CoreError> {
        if BigUint::from_bytes_be(&bytes) >= *field_prime() {
            return Err(CoreError::NonCanonicalField);
        }
        Ok(Self(bytes))
    }

    /// Interpret arbitrary big-endian bytes as an integer and reduce it.
    pub fn from_be_bytes_mod_order(bytes: &[u8]) -> Self {
        Self::from_biguint(&BigUint::from_bytes_be(bytes))
    }

    /// Reduce an arbitrary integer into the field.
    pub fn from_biguint(value: &BigUint) -> Self {
        let reduced = value % field_prime();
        let be = reduced.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - be.len()..].copy_from_slice(&be);
        Self(out)
    }

    /// The integer value of this element.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Encode a signed value as `(value + p) mod p`.
    ///
    /// Negative values map to `p - |value|`, so withdrawals get a unique
    /// non-negative representative.
    pub fn from_signed(value: i128) -> Self {
        let magnitude = Self::from_biguint(&BigUint::from(value.unsigned_abs()));
        if value < 0 {
            magnitude.neg()
        } else {
            magnitude
        }
    }

    /// Additive inverse.
    pub fn neg(&self) -> Self {
        if self.is_zero() {
            return *self;
        }
        Self::from_biguint(&(field_prime() - self.to_biguint()))
    }

    /// Uniformly random element (wide reduction of 64 random bytes).
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Self::from_be_bytes_mod_order(&wide)
    }

    /// Random element drawn from `len` random bytes (`len` is clamped to 31).
    ///
    /// Short random values always fit a fixed-width payload segment.
    pub fn random_with_len<R: RngCore>(rng: &mut R, len: usize) -> Self {
        let len = len.min(FIELD_BYTES - 1);
        let mut out = [0u8; FIELD_BYTES];
        rng.fill_bytes(&mut out[FIELD_BYTES - len..]);
        Self(out)
    }

    /// Fixed-width big-endian encoding of `width` bytes.
    pub fn to_segment(&self, width: usize) -> Result<Vec<u8>, CoreError> {
        let leading = self.0.iter().take_while(|b| **b == 0).count();
        let significant = FIELD_BYTES - leading;
        if significant > width {
            return Err(CoreError::SegmentOverflow(width));
        }
        let mut out = vec![0u8; width];
        out[width - significant..].copy_from_slice(&self.0[leading..]);
        Ok(out)
    }

    /// Decode a fixed-width big-endian segment produced by [`Self::to_segment`].
    pub fn from_segment(bytes: &[u8]) -> Result<Self, CoreError> {
        let leading = bytes.iter().take_while(|b| **b == 0).count();
        let significant = &bytes[leading..];
        if significant.len() > FIELD_BYTES {
            return Err(CoreError::SegmentOverflow(FIELD_BYTES));
        }
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - significant.len()..].copy_from_slice(significant);
        Self::from_canonical_bytes(out)
    }

    /// Lower 64 bits of the integer value, if the value fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..FIELD_BYTES - 8].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[FIELD_BYTES - 8..]);
        Some(u64::from_be_bytes(low))
    }

    /// Remainder of the integer value modulo `modulus`.
    pub fn reduce_to(&self, modulus: u64) -> u64 {
        if modulus == 0 {
            return 0;
        }
        let rem = self.to_biguint() % BigUint::from(modulus);
        if rem.is_zero() {
            return 0;
        }
        rem.to_u64_digits().first().copied().unwrap_or(0)
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(out)
    }
}

impl Zeroize for FieldElement {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for FieldElement {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let padded;
        let s = if s.len() % 2 == 1 {
            padded = format!("0{s}");
            padded.as_str()
        } else {
            s
        };
        let bytes = hex::decode(s)?;
        if bytes.len() > FIELD_BYTES {
            return Err(CoreError::InvalidHexLength {
                expected: FIELD_BYTES,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; FIELD_BYTES];
        arr[FIELD_BYTES - bytes.len()..].copy_from_slice(&bytes);
        Self::from_canonical_bytes(arr)
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn signed_encoding_wraps_negative_values() {
        let minus_five = FieldElement::from_signed(-5);
        assert_eq!(minus_five.neg(), FieldElement::from(5));
        assert_eq!(FieldElement::zero().neg(), FieldElement::zero());
        assert_eq!(
            minus_five.to_biguint(),
            field_prime() - BigUint::from(5u32)
        );
        assert_eq!(FieldElement::from_signed(7), FieldElement::from(7));
        assert_eq!(FieldElement::from_signed(0), FieldElement::zero());
    }

    #[test]
    fn modulus_is_not_canonical() {
        let mut bytes = [0u8; FIELD_BYTES];
        let be = field_prime().to_bytes_be();
        bytes[FIELD_BYTES - be.len()..].copy_from_slice(&be);
        assert!(matches!(
            FieldElement::from_canonical_bytes(bytes),
            Err(CoreError::NonCanonicalField)
        ));
        assert!(FieldElement::from_be_bytes_mod_order(&bytes).is_zero());
    }

    #[test]
    fn segments_are_fixed_width() {
        let v = FieldElement::from(0x0102u64);
        let seg = v.to_segment(31).expect("fits");
        assert_eq!(seg.len(), 31);
        assert_eq!(&seg[29..], &[0x01, 0x02]);
        assert_eq!(FieldElement::from_segment(&seg).expect("decode"), v);

        let full = FieldElement::random(&mut OsRng);
        if full.as_bytes()[0] != 0 {
            assert!(matches!(full.to_segment(31), Err(CoreError::SegmentOverflow(31))));
        }
        let short = FieldElement::random_with_len(&mut OsRng, 31);
        assert!(short.to_segment(31).is_ok());
    }

    #[test]
    fn hex_round_trip_and_short_forms() {
        let v: FieldElement = "0x1f".parse().expect("parse");
        assert_eq!(v, FieldElement::from(31));
        let again: FieldElement = v.to_string().parse().expect("parse");
        assert_eq!(again, v);
        assert_eq!(v.to_u64(), Some(31));
        assert_eq!(v.reduce_to(16), 15);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let v = FieldElement::from(255);
        let json = serde_json::to_string(&v).expect("json");
        assert!(json.contains("0x"));
        let back: FieldElement = serde_json::from_str(&json).expect("json");
        assert_eq!(back, v);
    }
}
