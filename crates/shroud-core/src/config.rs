//! Per-session pool configuration.
//!
//! Contract addresses, tree heights and filter sizes are passed explicitly to
//! every component; nothing in the library reads the environment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::CoreError;

/// Which compliance witness the transaction preparer produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceMode {
    /// Plain shielded pool, no proof of innocence.
    #[default]
    None,
    /// One sparse-Merkle exclusion proof per masked ancestor.
    ExactSmt,
    /// OR-merged Bloom chain state checked against flagged entries.
    ProbabilisticBloom,
}

/// Explicit configuration shared by the engine components.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Ledger address of the shielded pool contract.
    pub pool_address: String,
    /// Ledger address of the masked-commitment / status registry contract.
    pub registry_address: String,
    /// Height of the commitment Merkle tree.
    pub merkle_tree_height: u8,
    /// Height of the compliance status sparse Merkle tree.
    pub status_tree_height: u8,
    /// Number of slots in a Bloom chain state.
    pub bloom_filter_bits: usize,
    /// Compliance witness flavour.
    pub compliance_mode: ComplianceMode,
    /// First block to scan for pool events.
    pub start_block: u64,
    /// Maximum blocks per event query; `None` queries the whole range at once.
    pub block_page_size: Option<u64>,
    /// Upper bound on concurrently fetched pages.
    pub max_parallel_fetches: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_address: String::new(),
            registry_address: String::new(),
            merkle_tree_height: DEFAULT_MERKLE_TREE_HEIGHT,
            status_tree_height: DEFAULT_STATUS_TREE_HEIGHT,
            bloom_filter_bits: DEFAULT_BLOOM_FILTER_BITS,
            compliance_mode: ComplianceMode::None,
            start_block: 0,
            block_page_size: None,
            max_parallel_fetches: 4,
        }
    }
}

impl PoolConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigLoad(e.to_string()))?;
        let cfg: Self =
            serde_json::from_str(&raw).map_err(|e| CoreError::ConfigLoad(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.merkle_tree_height == 0 || self.merkle_tree_height > 32 {
            return Err(CoreError::InvalidConfig("merkle_tree_height must be in 1..=32"));
        }
        if self.status_tree_height == 0 || self.status_tree_height > 64 {
            return Err(CoreError::InvalidConfig("status_tree_height must be in 1..=64"));
        }
        if self.bloom_filter_bits < 8 || self.bloom_filter_bits % 8 != 0 {
            return Err(CoreError::InvalidConfig(
                "bloom_filter_bits must be a positive multiple of 8",
            ));
        }
        if self.block_page_size == Some(0) {
            return Err(CoreError::InvalidConfig("block_page_size must be non-zero"));
        }
        if self.max_parallel_fetches == 0 {
            return Err(CoreError::InvalidConfig("max_parallel_fetches must be non-zero"));
        }
        Ok(())
    }
}
