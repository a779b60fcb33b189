//! Materializing the chain from initialization data.
//!
//! [`import_blocks`] streams archived blocks into the store, then
//! [`write_or_test_blockchain`] either writes the genesis state at the imported
//! height or, when a block is already archived there, checks that the
//! recomputed genesis matches it.

use std::collections::HashSet;

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use slog::Logger;
use thiserror::Error;

use crate::burn::SystemBurner;
use crate::config::ChainConfig;
use crate::init::{InitDataReader, StoredBlock};
use crate::state::{Account, Block, SystemState, state_root};
use crate::storage::{ChainStore, StateSnapshot};

/// Timestamp recorded on every genesis block.
pub const GENESIS_TIMESTAMP: u64 = 0;

/// The genesis computed from initialization data differs from the archived one.
#[derive(Debug, Error)]
#[error("genesis block {number} mismatch: database has {stored}, initialization data yields {computed}")]
pub struct GenesisMismatch {
    pub number: u64,
    pub stored: B256,
    pub computed: B256,
}

/// Handle to the materialized chain.
#[derive(Clone)]
pub struct BlockChain {
    store: ChainStore,
    config: ChainConfig,
    head: Block,
}

impl BlockChain {
    /// Opens a read-only snapshot of the latest committed state.
    pub fn state(&self) -> Result<StateSnapshot> {
        self.store.snapshot()
    }

    pub fn account(&self, address: &Address) -> Result<Option<Account>> {
        self.store.get_account(address)
    }

    /// Head block at the time the chain was opened.
    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }
}

/// Opens the chain already present in the store.
pub fn get_blockchain(store: &ChainStore, config: &ChainConfig) -> Result<BlockChain> {
    let head = store
        .head_block()?
        .context("chain store has no archived blocks")?;
    Ok(BlockChain {
        store: store.clone(),
        config: config.clone(),
        head,
    })
}

/// Streams `blocks` into the archive in a single write transaction.
///
/// Blocks must start at 0 and link by parent hash. Blocks already archived are
/// compared by hash and left untouched. Returns the number of blocks the
/// stream contained, which is the height the genesis state belongs at.
pub fn import_blocks<'a, I>(store: &ChainStore, blocks: I) -> Result<u64>
where
    I: IntoIterator<Item = &'a StoredBlock>,
{
    let mut writer = store.writer()?;
    let mut expected_number = 0u64;
    let mut parent = B256::ZERO;

    for stored in blocks {
        anyhow::ensure!(
            stored.number == expected_number,
            "import out of order: got block {}, expected {}",
            stored.number,
            expected_number
        );
        anyhow::ensure!(
            stored.parent_hash == parent,
            "block {} does not extend block {}: parent hash {} != {}",
            stored.number,
            expected_number.saturating_sub(1),
            stored.parent_hash,
            parent
        );
        let block = stored.to_block()?;

        match writer.ancient_block(block.number())? {
            Some(existing) => anyhow::ensure!(
                existing.hash() == block.hash(),
                "block {} conflicts with archived block: {} != {}",
                block.number(),
                block.hash(),
                existing.hash()
            ),
            None => writer
                .append_ancient(&block)
                .with_context(|| format!("Failed to archive block {}", block.number()))?,
        }

        parent = block.hash();
        expected_number += 1;
    }

    writer.commit()?;
    Ok(expected_number)
}

/// Writes the genesis state at `block_number`, or tests it against the
/// archived block at that height.
pub fn write_or_test_blockchain(
    store: &ChainStore,
    reader: &dyn InitDataReader,
    block_number: u64,
    config: &ChainConfig,
    logger: &Logger,
) -> Result<BlockChain> {
    let logger = logger.new(slog::o!("component" => "genesis"));

    let accounts = reader
        .accounts()?
        .into_iter()
        .map(|init| Account::new(init.address, init.balance, init.nonce))
        .collect::<Vec<_>>();

    let mut seen = HashSet::with_capacity(accounts.len());
    for account in &accounts {
        anyhow::ensure!(
            seen.insert(account.address),
            "duplicate account {} in initialization data",
            account.address()
        );
    }

    let parent = match block_number.checked_sub(1) {
        Some(previous) => store
            .ancient_block(previous)?
            .with_context(|| format!("missing archived parent block {previous}"))?
            .hash(),
        None => B256::ZERO,
    };
    let genesis = Block::new(
        block_number,
        parent,
        state_root(&accounts, config.chain_id),
        GENESIS_TIMESTAMP,
    );

    if let Some(stored) = store.ancient_block(block_number)? {
        if stored.hash() != genesis.hash() {
            return Err(GenesisMismatch {
                number: block_number,
                stored: stored.hash(),
                computed: genesis.hash(),
            }
            .into());
        }
        slog::info!(logger, "Genesis matches database"; "number" => block_number, "hash" => %genesis.hash());
        return get_blockchain(store, config);
    }

    let mut writer = store.writer()?;
    for account in &accounts {
        writer.put_account(account)?;
    }
    {
        let mut burner = SystemBurner::new(false, logger.clone());
        SystemState::initialize(&mut writer, &mut burner, config.chain_id, config.initial_version)
            .context("Failed to initialize system state")?;
    }
    writer.append_ancient(&genesis)?;
    writer.commit()?;

    slog::info!(
        logger,
        "Wrote genesis";
        "number" => block_number,
        "hash" => %genesis.hash(),
        "accounts" => accounts.len(),
        "chain_id" => config.chain_id,
    );
    get_blockchain(store, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burn::Burner;
    use crate::init::{AccountInit, InitData, MemoryInitDataReader};
    use alloy_primitives::U256;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn temp_store() -> (tempfile::TempDir, ChainStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        (dir, store)
    }

    fn dev_config() -> ChainConfig {
        ChainConfig::for_chain_id(412346).unwrap()
    }

    fn history(len: u64) -> Vec<StoredBlock> {
        let mut parent = B256::ZERO;
        (0..len)
            .map(|number| {
                let block = Block::new(number, parent, B256::repeat_byte(number as u8), number * 12);
                parent = block.hash();
                StoredBlock::from(&block)
            })
            .collect()
    }

    fn single_account(balance: u64) -> InitData {
        InitData {
            blocks: Vec::new(),
            accounts: vec![AccountInit {
                address: Address::repeat_byte(0x42),
                balance: U256::from(balance),
                nonce: 0,
            }],
        }
    }

    #[test]
    fn import_appends_linked_blocks() {
        let (_dir, store) = temp_store();
        let blocks = history(3);
        assert_eq!(import_blocks(&store, &blocks).unwrap(), 3);
        assert_eq!(store.ancients().unwrap(), 3);
        assert_eq!(store.head_block().unwrap().unwrap().hash(), blocks[2].to_block().unwrap().hash());

        // Importing the same history again is a no-op.
        assert_eq!(import_blocks(&store, &blocks).unwrap(), 3);
        assert_eq!(store.ancients().unwrap(), 3);
    }

    #[test]
    fn import_rejects_broken_parent_link() {
        let (_dir, store) = temp_store();
        let mut blocks = history(3);
        blocks[2].parent_hash = B256::repeat_byte(0xee);
        blocks[2].hash = None;
        assert!(import_blocks(&store, &blocks).is_err());
        // Nothing from the failed batch is committed.
        assert_eq!(store.ancients().unwrap(), 0);
    }

    #[test]
    fn import_must_start_at_zero() {
        let (_dir, store) = temp_store();
        let blocks = history(3);
        assert!(import_blocks(&store, &blocks[1..]).is_err());
    }

    #[test]
    fn genesis_is_written_then_tested() {
        let (_dir, store) = temp_store();
        let reader = MemoryInitDataReader::new(single_account(1_000));
        let config = dev_config();

        let chain = write_or_test_blockchain(&store, &reader, 0, &config, &test_logger()).unwrap();
        assert_eq!(chain.head().number(), 0);
        let account = chain.account(&Address::repeat_byte(0x42)).unwrap().unwrap();
        assert_eq!(account.balance(), U256::from(1_000u64));

        // A second run with the same data finds a matching genesis.
        let again = write_or_test_blockchain(&store, &reader, 0, &config, &test_logger()).unwrap();
        assert_eq!(again.head().hash(), chain.head().hash());
        assert_eq!(store.ancients().unwrap(), 1);
    }

    #[test]
    fn differing_genesis_is_rejected() {
        let (_dir, store) = temp_store();
        let config = dev_config();
        let original = MemoryInitDataReader::new(single_account(1_000));
        write_or_test_blockchain(&store, &original, 0, &config, &test_logger()).unwrap();

        let changed = MemoryInitDataReader::new(single_account(2_000));
        let err = match write_or_test_blockchain(&store, &changed, 0, &config, &test_logger()) {
            Ok(_) => panic!("mismatched genesis must be rejected"),
            Err(err) => err,
        };
        let mismatch = err.downcast_ref::<GenesisMismatch>().unwrap();
        assert_eq!(mismatch.number, 0);
    }

    #[test]
    fn genesis_after_import_links_to_history() {
        let (_dir, store) = temp_store();
        let blocks = history(2);
        let data = InitData {
            blocks: blocks.clone(),
            ..single_account(5)
        };
        let reader = MemoryInitDataReader::new(data);
        let height = import_blocks(&store, reader.stored_blocks().unwrap()).unwrap();

        let chain =
            write_or_test_blockchain(&store, &reader, height, &dev_config(), &test_logger()).unwrap();
        assert_eq!(chain.head().number(), 2);
        assert_eq!(chain.head().parent_hash(), blocks[1].to_block().unwrap().hash());
    }

    #[test]
    fn duplicate_accounts_are_rejected() {
        let (_dir, store) = temp_store();
        let mut data = single_account(1);
        data.accounts.push(data.accounts[0].clone());
        let reader = MemoryInitDataReader::new(data);
        assert!(write_or_test_blockchain(&store, &reader, 0, &dev_config(), &test_logger()).is_err());
        assert_eq!(store.ancients().unwrap(), 0);
    }

    #[test]
    fn genesis_records_chain_id() {
        let (_dir, store) = temp_store();
        let reader = MemoryInitDataReader::new(single_account(1));
        let chain = write_or_test_blockchain(&store, &reader, 0, &dev_config(), &test_logger()).unwrap();

        let mut snapshot = chain.state().unwrap();
        let mut burner = SystemBurner::new(true, test_logger());
        let mut system = SystemState::open(&mut snapshot, &mut burner).unwrap();
        assert_eq!(system.chain_id().unwrap(), U256::from(412346u64));
        assert!(system.burner().read_only());
    }

    #[test]
    fn get_blockchain_requires_blocks() {
        let (_dir, store) = temp_store();
        assert!(get_blockchain(&store, &dev_config()).is_err());
    }
}
