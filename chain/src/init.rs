//! Initialization data used to populate a fresh chain store.
//!
//! Import snapshots are JSON documents listing the archived blocks to import
//! and the accounts to seed at the genesis height:
//!
//! ```json
//! {
//!   "blocks": [{ "number": 0, "parentHash": "0x00..", "stateRoot": "0x..", "timestamp": 0 }],
//!   "accounts": [{ "address": "0x..", "balance": "0x3635c9adc5dea00000", "nonce": 0 }]
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::state::Block;

/// A block as listed in an import snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlock {
    pub number: u64,
    pub parent_hash: B256,
    pub state_root: B256,
    #[serde(default)]
    pub timestamp: u64,
    /// Expected block hash; verified against the header when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,
}

impl StoredBlock {
    pub fn to_block(&self) -> Result<Block> {
        let block = Block::new(self.number, self.parent_hash, self.state_root, self.timestamp);
        if let Some(expected) = self.hash {
            anyhow::ensure!(
                expected == block.hash(),
                "block {} hash mismatch: snapshot lists {}, header hashes to {}",
                self.number,
                expected,
                block.hash()
            );
        }
        Ok(block)
    }
}

impl From<&Block> for StoredBlock {
    fn from(block: &Block) -> Self {
        Self {
            number: block.number(),
            parent_hash: block.parent_hash(),
            state_root: block.state_root(),
            timestamp: block.timestamp(),
            hash: Some(block.hash()),
        }
    }
}

/// An account seeded at genesis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInit {
    pub address: Address,
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitData {
    pub blocks: Vec<StoredBlock>,
    pub accounts: Vec<AccountInit>,
}

/// Source of initialization data.
pub trait InitDataReader {
    /// Archived blocks to import, in order.
    fn stored_blocks(&self) -> Result<Box<dyn Iterator<Item = &StoredBlock> + '_>>;

    /// Accounts to seed at the genesis height.
    fn accounts(&self) -> Result<Vec<AccountInit>>;
}

/// Reader over a JSON import snapshot on disk.
pub struct JsonInitDataReader {
    data: InitData,
}

impl JsonInitDataReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open import file {}", path.display()))?;
        let data: InitData = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse import file {}", path.display()))?;
        Ok(Self { data })
    }
}

impl InitDataReader for JsonInitDataReader {
    fn stored_blocks(&self) -> Result<Box<dyn Iterator<Item = &StoredBlock> + '_>> {
        Ok(Box::new(self.data.blocks.iter()))
    }

    fn accounts(&self) -> Result<Vec<AccountInit>> {
        Ok(self.data.accounts.clone())
    }
}

/// Reader over initialization data built in memory, used for dev genesis.
pub struct MemoryInitDataReader {
    data: InitData,
}

impl MemoryInitDataReader {
    pub fn new(data: InitData) -> Self {
        Self { data }
    }
}

impl InitDataReader for MemoryInitDataReader {
    fn stored_blocks(&self) -> Result<Box<dyn Iterator<Item = &StoredBlock> + '_>> {
        Ok(Box::new(self.data.blocks.iter()))
    }

    fn accounts(&self) -> Result<Vec<AccountInit>> {
        Ok(self.data.accounts.clone())
    }
}
