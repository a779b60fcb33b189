use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTableMetadata};

use crate::state::{Account, Block};
use crate::storage::snapshot::{StateSnapshot, StateWriter, last_block};
use crate::storage::tables::{ACCOUNTS, ANCIENTS, SYSTEM};

/// [`ChainStore`] is a wrapper around the redb database holding the L2 chain.
///
/// It keeps three tables: the archive of frozen blocks (`ancients`), the
/// account state and the system state. Handles are cheap to clone and share
/// the same underlying database, which must be opened exactly once per
/// process.
///
/// # Examples
///
/// ```rust,ignore
/// let store = ChainStore::open("path/to/chain.redb")?;
/// let mut writer = store.writer()?;
/// writer.append_ancient(&Block::new(0, B256::ZERO, state_root, 0))?;
/// writer.commit()?;
/// assert_eq!(store.ancients()?, 1);
/// ```
#[derive(Clone)]
pub struct ChainStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl ChainStore {
    /// Opens the database at `path`, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = if path.exists() {
            Database::open(path).context("Failed to open database")?
        } else {
            Database::create(path).context("Failed to create database")?
        };
        let store = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Initializes the tables in the database
    fn init_tables(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            write_txn
                .open_table(ANCIENTS)
                .context("Failed to open ancients table")?;
            write_txn
                .open_table(ACCOUNTS)
                .context("Failed to open accounts table")?;
            write_txn
                .open_table(SYSTEM)
                .context("Failed to open system table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit write transaction")
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of blocks in the archive.
    pub fn ancients(&self) -> Result<u64> {
        let read = self.db.begin_read()?;
        let table = read
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        Ok(table.len()?)
    }

    /// Retrieves an archived block by number, if it exists.
    pub fn ancient_block(&self, number: u64) -> Result<Option<Block>> {
        self.snapshot()?.ancient_block(number)
    }

    /// Returns the most recent archived block.
    pub fn head_block(&self) -> Result<Option<Block>> {
        let read = self.db.begin_read()?;
        let table = read
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        last_block(&table)
    }

    /// Appends a single block to the archive.
    pub fn append_ancient(&self, block: &Block) -> Result<()> {
        let mut writer = self.writer()?;
        writer.append_ancient(block)?;
        writer.commit()
    }

    /// Retrieves an account from the latest committed state.
    pub fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        self.snapshot()?.account(address)
    }

    /// Inserts or replaces an account.
    pub fn put_account(&self, account: &Account) -> Result<()> {
        let mut writer = self.writer()?;
        writer.put_account(account)?;
        writer.commit()
    }

    /// Opens a read-only snapshot at the current head.
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        let read = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        StateSnapshot::new(read)
    }

    /// Begins a batched write.
    pub fn writer(&self) -> Result<StateWriter> {
        let write = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        Ok(StateWriter::new(write))
    }

    /// Number of live handles sharing this database.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.db)
    }

    /// Closes the database.
    ///
    /// Fails if other handles are still alive: every consumer must have been
    /// shut down before the store is released.
    pub fn close(self) -> Result<()> {
        let path = self.path;
        match Arc::try_unwrap(self.db) {
            Ok(db) => {
                drop(db);
                Ok(())
            }
            Err(db) => Err(anyhow::anyhow!(
                "chain store {} still has {} open handles",
                path.display(),
                Arc::strong_count(&db) - 1
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use rand::Rng;

    fn temp_db_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.redb");
        (dir, path)
    }

    fn random_address() -> Address {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill(&mut bytes);
        Address::from(bytes)
    }

    #[test]
    fn open_creates_empty_tables() {
        let (_dir, path) = temp_db_path();
        let store = ChainStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.ancients().unwrap(), 0);
        assert!(store.head_block().unwrap().is_none());
        assert!(store.ancient_block(0).unwrap().is_none());
    }

    #[test]
    fn archive_is_contiguous() {
        let (_dir, path) = temp_db_path();
        let store = ChainStore::open(&path).unwrap();
        let genesis = Block::new(0, B256::ZERO, B256::ZERO, 0);
        store.append_ancient(&genesis).unwrap();

        let skipped = Block::new(2, genesis.hash(), B256::ZERO, 0);
        assert!(store.append_ancient(&skipped).is_err());

        let next = Block::new(1, genesis.hash(), B256::ZERO, 1);
        store.append_ancient(&next).unwrap();
        assert_eq!(store.ancients().unwrap(), 2);
        assert_eq!(store.head_block().unwrap(), Some(next));
        assert_eq!(store.ancient_block(0).unwrap(), Some(genesis));
    }

    #[test]
    fn accounts_survive_reopen() {
        let (_dir, path) = temp_db_path();
        let address = random_address();
        {
            let store = ChainStore::open(&path).unwrap();
            store
                .put_account(&Account::new(address, U256::from(77u64), 3))
                .unwrap();
            store.close().unwrap();
        }

        let store = ChainStore::open(&path).unwrap();
        let account = store.get_account(&address).unwrap().unwrap();
        assert_eq!(account.address(), address);
        assert_eq!(account.balance(), U256::from(77u64));
        assert_eq!(account.nonce, 3);
        assert!(store.get_account(&random_address()).unwrap().is_none());
    }

    #[test]
    fn dropped_writer_discards_changes() {
        let (_dir, path) = temp_db_path();
        let store = ChainStore::open(&path).unwrap();
        {
            let mut writer = store.writer().unwrap();
            writer
                .append_ancient(&Block::new(0, B256::ZERO, B256::ZERO, 0))
                .unwrap();
            assert_eq!(writer.ancients().unwrap(), 1);
        }
        assert_eq!(store.ancients().unwrap(), 0);
    }

    #[test]
    fn snapshot_keeps_its_head() {
        let (_dir, path) = temp_db_path();
        let store = ChainStore::open(&path).unwrap();
        let genesis = Block::new(0, B256::ZERO, B256::ZERO, 0);
        store.append_ancient(&genesis).unwrap();

        let snapshot = store.snapshot().unwrap();
        store
            .append_ancient(&Block::new(1, genesis.hash(), B256::ZERO, 1))
            .unwrap();
        assert_eq!(snapshot.head(), Some(&genesis));
        assert!(snapshot.ancient_block(1).unwrap().is_none());
    }

    #[test]
    fn close_fails_while_handles_are_shared() {
        let (_dir, path) = temp_db_path();
        let store = ChainStore::open(&path).unwrap();
        let other = store.clone();
        assert_eq!(store.handle_count(), 2);
        assert!(store.close().is_err());
        other.close().unwrap();
    }
}
