#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Shroud compliance layer.
//!
//! Lets an authority retroactively taint funds traced to sanctioned
//! depositors without shrinking the anonymity set:
//! - a masked-commitment registry (one masked identity per depositor)
//! - the public status tree with inclusion and exclusion proofs
//! - Bloom chain-state screening
//! - the authority's scan-and-flag workflow

pub mod authority;
pub mod bloom;
pub mod error;
pub mod registry;
pub mod smt;

pub use authority::*;
pub use bloom::*;
pub use error::*;
pub use registry::*;
pub use smt::*;
