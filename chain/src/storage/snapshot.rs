//! Transactional views over the chain store.
//!
//! A [`StateSnapshot`] is a consistent read-only view of the state at the
//! chain head it was opened at. A [`StateWriter`] batches mutations into a
//! single redb write transaction that becomes visible on [`StateWriter::commit`].

use alloy_primitives::Address;
use anyhow::{Context, Result};
use redb::{ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata, WriteTransaction};

use crate::state::{Account, Block};
use crate::storage::conversions::{Storable, deserialize_from_db};
use crate::storage::tables::{ACCOUNTS, ANCIENTS, SYSTEM};

/// Key/value access to system-level state.
///
/// Implemented by both the read-only snapshot and the writer so that
/// [`SystemState`](crate::SystemState) can be opened over either.
pub trait StateBackend {
    /// Reads a raw system-state value.
    fn get_system(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a raw system-state value.
    fn put_system(&mut self, key: &str, value: &[u8]) -> Result<()>;
}

/// Read-only view of the chain state at a fixed head.
pub struct StateSnapshot {
    txn: ReadTransaction,
    head: Option<Block>,
}

impl StateSnapshot {
    pub(crate) fn new(txn: ReadTransaction) -> Result<Self> {
        let head = {
            let table = txn.open_table(ANCIENTS).context("Failed to open ancients table")?;
            last_block(&table)?
        };
        Ok(Self { txn, head })
    }

    /// Returns the head block this snapshot was opened at.
    pub fn head(&self) -> Option<&Block> {
        self.head.as_ref()
    }

    /// Retrieves an archived block by number, if it exists.
    pub fn ancient_block(&self, number: u64) -> Result<Option<Block>> {
        let table = self
            .txn
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        let block = match table.get(number.to_be_bytes().as_slice())? {
            Some(row) => Some(deserialize_from_db(row.value())?),
            None => None,
        };
        Ok(block)
    }

    /// Retrieves an account, if it exists.
    pub fn account(&self, address: &Address) -> Result<Option<Account>> {
        let table = self
            .txn
            .open_table(ACCOUNTS)
            .context("Failed to open accounts table")?;
        let account = match table.get(address.as_slice())? {
            Some(row) => Some(deserialize_from_db(row.value())?),
            None => None,
        };
        Ok(account)
    }
}

impl StateBackend for StateSnapshot {
    fn get_system(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let table = self
            .txn
            .open_table(SYSTEM)
            .context("Failed to open system table")?;
        let value = table.get(key.as_bytes())?.map(|row| row.value().to_vec());
        Ok(value)
    }

    fn put_system(&mut self, key: &str, _value: &[u8]) -> Result<()> {
        anyhow::bail!("cannot write system key {key:?}: state snapshot is read-only")
    }
}

/// Batched mutation of the chain store in a single write transaction.
///
/// Dropping a writer without calling [`commit`](Self::commit) aborts every
/// mutation made through it.
pub struct StateWriter {
    txn: WriteTransaction,
}

impl StateWriter {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Self { txn }
    }

    /// Number of blocks in the archive, including uncommitted appends.
    pub fn ancients(&self) -> Result<u64> {
        let table = self
            .txn
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        Ok(table.len()?)
    }

    /// Reads an archived block, including uncommitted appends.
    pub fn ancient_block(&self, number: u64) -> Result<Option<Block>> {
        let table = self
            .txn
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        let block = match table.get(number.to_be_bytes().as_slice())? {
            Some(row) => Some(deserialize_from_db(row.value())?),
            None => None,
        };
        Ok(block)
    }

    /// Appends a block to the archive.
    ///
    /// The archive is append-only and contiguous: the block number must equal
    /// the current archive length.
    pub fn append_ancient(&mut self, block: &Block) -> Result<()> {
        let mut table = self
            .txn
            .open_table(ANCIENTS)
            .context("Failed to open ancients table")?;
        let expected = table.len()?;
        anyhow::ensure!(
            block.number() == expected,
            "non-contiguous archive append: got block {}, expected {}",
            block.number(),
            expected
        );
        let bytes = block.value()?;
        table
            .insert(block.key().as_slice(), bytes.as_ref())
            .context("Failed to insert ancient block")?;
        Ok(())
    }

    /// Inserts or replaces an account.
    pub fn put_account(&mut self, account: &Account) -> Result<()> {
        let mut table = self
            .txn
            .open_table(ACCOUNTS)
            .context("Failed to open accounts table")?;
        let bytes = account.value()?;
        table
            .insert(account.key().as_slice(), bytes.as_ref())
            .context("Failed to insert account")?;
        Ok(())
    }

    /// Makes every mutation visible atomically.
    pub fn commit(self) -> Result<()> {
        self.txn
            .commit()
            .context("Failed to commit write transaction")
    }
}

impl StateBackend for StateWriter {
    fn get_system(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let table = self
            .txn
            .open_table(SYSTEM)
            .context("Failed to open system table")?;
        let value = table.get(key.as_bytes())?.map(|row| row.value().to_vec());
        Ok(value)
    }

    fn put_system(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let mut table = self
            .txn
            .open_table(SYSTEM)
            .context("Failed to open system table")?;
        table
            .insert(key.as_bytes(), value)
            .context("Failed to insert system value")?;
        Ok(())
    }
}

pub(crate) fn last_block(
    table: &ReadOnlyTable<&'static [u8], &'static [u8]>,
) -> Result<Option<Block>> {
    let block = match table.last()? {
        Some((_, value)) => Some(deserialize_from_db(value.value())?),
        None => None,
    };
    Ok(block)
}
