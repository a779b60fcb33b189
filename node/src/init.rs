//! Chain state initialization.
//!
//! The source is chosen from configuration alone: an import snapshot wins over
//! the development genesis, and with neither the node resumes whatever the
//! store already holds.

use std::path::PathBuf;

use alloy_primitives::{Address, U256};
use chain::{
    AccountInit, BlockChain, ChainConfig, ChainStore, GenesisMismatch, InitData, InitDataReader,
    JsonInitDataReader, MemoryInitDataReader,
};
use slog::Logger;

use crate::config::NodeConfig;
use crate::error::{ConsistencyError, InitError, NodeError};

/// Balance of the development account: 1000 ether in wei.
pub fn dev_balance() -> U256 {
    U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64))
}

/// Initialization data holding only the funded development account.
pub fn dev_genesis(address: Address) -> InitData {
    InitData {
        blocks: Vec::new(),
        accounts: vec![AccountInit {
            address,
            balance: dev_balance(),
            nonce: 0,
        }],
    }
}

/// Where the initial chain state comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSource {
    ImportSnapshot(PathBuf),
    DevGenesis,
    ResumeExisting,
}

impl InitSource {
    pub fn select(config: &NodeConfig) -> Self {
        match &config.import_file {
            Some(path) if !path.as_os_str().is_empty() => Self::ImportSnapshot(path.clone()),
            _ if config.dev_init => Self::DevGenesis,
            _ => Self::ResumeExisting,
        }
    }
}

/// Materializes the chain from an [`InitSource`].
pub struct ChainStateInitializer {
    chain_config: ChainConfig,
    dev_address: Address,
    logger: Logger,
}

impl ChainStateInitializer {
    pub fn new(chain_config: ChainConfig, dev_address: Address, logger: &Logger) -> Self {
        Self {
            chain_config,
            dev_address,
            logger: logger.new(slog::o!("component" => "chain-init")),
        }
    }

    /// Returns the chain and the block number it starts from.
    pub fn initialize(&self, store: &ChainStore, source: &InitSource) -> Result<(BlockChain, u64), NodeError> {
        slog::info!(self.logger, "Initializing chain state"; "source" => ?source);
        match source {
            InitSource::ImportSnapshot(path) => {
                let reader = JsonInitDataReader::open(path).map_err(NodeError::Resource)?;
                self.materialize(store, &reader)
            }
            InitSource::DevGenesis => {
                let reader = MemoryInitDataReader::new(dev_genesis(self.dev_address));
                self.materialize(store, &reader)
            }
            InitSource::ResumeExisting => {
                let blocks = store.ancients().map_err(NodeError::Resource)?;
                if blocks == 0 {
                    return Err(InitError::NoInitializationMode.into());
                }
                let chain = chain::get_blockchain(store, &self.chain_config).map_err(NodeError::Resource)?;
                let head = chain.head().number();
                slog::info!(self.logger, "Resuming existing chain"; "blocks" => blocks, "head" => head);
                Ok((chain, head))
            }
        }
    }

    fn materialize(&self, store: &ChainStore, reader: &dyn InitDataReader) -> Result<(BlockChain, u64), NodeError> {
        let blocks = reader.stored_blocks().map_err(NodeError::Import)?;
        let block_number = chain::import_blocks(store, blocks).map_err(NodeError::Import)?;
        slog::debug!(self.logger, "Imported archived blocks"; "count" => block_number);

        let chain = chain::write_or_test_blockchain(
            store,
            reader,
            block_number,
            &self.chain_config,
            &self.logger,
        )
        .map_err(|e| match e.downcast::<GenesisMismatch>() {
            Ok(mismatch) => NodeError::Consistency(ConsistencyError::GenesisMismatch(mismatch.to_string())),
            Err(e) => NodeError::Import(e),
        })?;
        Ok((chain, block_number))
    }
}
