#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Shroud state model.
//!
//! Responsibilities:
//! - The shielded note (UTXO) with commitment, nullifier and payload encryption
//! - Ledger event types and their canonical ordering
//! - The fixed-height commitment tree and authentication paths
//! - The spent-nullifier set
//! - Compliance ancestry (masked-ancestor sets and Bloom chain states)

pub mod chainstate;
pub mod error;
pub mod events;
pub mod merkle;
pub mod nullifier;
pub mod utxo;

pub use chainstate::*;
pub use error::*;
pub use events::*;
pub use merkle::*;
pub use nullifier::*;
pub use utxo::*;
