#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Shroud core: field elements, keypairs, the crypto provider interface,
//! canonical serialization helpers, the prover interface and pool
//! configuration.

pub mod config;
pub mod constants;
pub mod crypto;
pub mod field;
pub mod keypair;
pub mod prover;
pub mod serialization;
pub mod types;

pub use config::*;
pub use constants::*;
pub use crypto::*;
pub use field::*;
pub use keypair::*;
pub use prover::*;
pub use serialization::*;
pub use types::*;
