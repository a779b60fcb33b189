//! Chain crate - persistent chain state for the L2 node.
//!
//! This crate owns everything the node controller needs to materialize and
//! inspect the chain before handing it to the rollup engine:
//!
//! - **Storage**: redb-backed [`ChainStore`] with an archive of frozen blocks,
//!   account state and system state
//! - **State**: [`Account`], [`Block`] and the burner-metered [`SystemState`]
//! - **Initialization data**: JSON import snapshots and in-memory genesis data
//! - **Block chain**: importing archived blocks and writing (or testing) the
//!   genesis state at the imported height
//!
//! ## Example
//!
//! ```ignore
//! use chain::{ChainConfig, ChainStore, MemoryInitDataReader};
//!
//! let store = ChainStore::open("/var/lib/l2/l2chaindata/chain.redb")?;
//! let config = ChainConfig::for_chain_id(412346).expect("known chain");
//! let reader = MemoryInitDataReader::new(init_data);
//!
//! let imported = chain::import_blocks(&store, reader.stored_blocks()?)?;
//! let chain = chain::write_or_test_blockchain(&store, &reader, imported, &config, &logger)?;
//! ```

pub mod blockchain;
pub mod burn;
pub mod config;
pub mod init;
pub mod state;
pub mod storage;

pub use blockchain::{
    BlockChain, GenesisMismatch, get_blockchain, import_blocks, write_or_test_blockchain,
};
pub use burn::{Burner, SystemBurner};
pub use config::ChainConfig;
pub use init::{AccountInit, InitData, InitDataReader, JsonInitDataReader, MemoryInitDataReader, StoredBlock};
pub use state::{Account, Block, SystemState, WriteProtection, state_root};
pub use storage::{ChainStore, StateBackend, StateSnapshot, StateWriter};
