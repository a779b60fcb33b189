//! System-level state recorded alongside the accounts.
//!
//! Every access is charged to a [`Burner`]; writes through a read-only burner
//! are reported with [`Burner::restrict`] and refused with [`WriteProtection`].

use alloy_primitives::U256;
use anyhow::{Context, Result};
use thiserror::Error;

use crate::burn::Burner;
use crate::storage::StateBackend;

/// Cost charged for reading a system-state slot.
pub const STORAGE_READ_COST: u64 = 800;
/// Cost charged for writing a system-state slot.
pub const STORAGE_WRITE_COST: u64 = 20_000;

const VERSION_KEY: &str = "version";
const CHAIN_ID_KEY: &str = "chain_id";

/// A write was attempted through a read-only view of the state.
#[derive(Debug, Error)]
#[error("write protection: system key {key:?} is read-only")]
pub struct WriteProtection {
    pub key: String,
}

/// Handle to the system state, metered by a [`Burner`].
pub struct SystemState<'a, S: StateBackend + ?Sized, B: Burner + ?Sized> {
    backend: &'a mut S,
    burner: &'a mut B,
    version: u64,
}

impl<'a, S: StateBackend + ?Sized, B: Burner + ?Sized> SystemState<'a, S, B> {
    /// Writes a fresh system state for `chain_id`.
    pub fn initialize(
        backend: &'a mut S,
        burner: &'a mut B,
        chain_id: u64,
        version: u64,
    ) -> Result<Self> {
        let mut state = Self {
            backend,
            burner,
            version,
        };
        state.set(VERSION_KEY, &version.to_be_bytes())?;
        state.set(CHAIN_ID_KEY, &U256::from(chain_id).to_be_bytes::<32>())?;
        Ok(state)
    }

    /// Opens an existing system state.
    pub fn open(backend: &'a mut S, burner: &'a mut B) -> Result<Self> {
        burner.burn(STORAGE_READ_COST)?;
        let raw = backend
            .get_system(VERSION_KEY)?
            .context("system state is not initialized")?;
        let bytes: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("malformed system state version ({} bytes)", raw.len()))?;
        Ok(Self {
            backend,
            burner,
            version: u64::from_be_bytes(bytes),
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The chain id recorded when the state was initialized.
    pub fn chain_id(&mut self) -> Result<U256> {
        self.burner.burn(STORAGE_READ_COST)?;
        let raw = self
            .backend
            .get_system(CHAIN_ID_KEY)?
            .context("system state has no chain id")?;
        anyhow::ensure!(raw.len() <= 32, "malformed chain id ({} bytes)", raw.len());
        Ok(U256::from_be_slice(&raw))
    }

    /// Overwrites the recorded chain id.
    pub fn set_chain_id(&mut self, chain_id: U256) -> Result<()> {
        self.set(CHAIN_ID_KEY, &chain_id.to_be_bytes::<32>())
    }

    pub fn burner(&self) -> &B {
        self.burner
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if self.burner.read_only() {
            let err = anyhow::Error::new(WriteProtection {
                key: key.to_string(),
            });
            self.burner.restrict(&err);
            return Err(err);
        }
        self.burner.burn(STORAGE_WRITE_COST)?;
        self.backend.put_system(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burn::SystemBurner;
    use crate::storage::ChainStore;
    use slog::Logger;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn temp_store() -> (tempfile::TempDir, ChainStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn initialize_then_open_reads_chain_id() {
        let (_dir, store) = temp_store();
        {
            let mut writer = store.writer().unwrap();
            let mut burner = SystemBurner::new(false, test_logger());
            SystemState::initialize(&mut writer, &mut burner, 412346, 1).unwrap();
            assert_eq!(burner.burned(), 2 * STORAGE_WRITE_COST);
            writer.commit().unwrap();
        }

        let mut snapshot = store.snapshot().unwrap();
        let mut burner = SystemBurner::new(true, test_logger());
        let mut state = SystemState::open(&mut snapshot, &mut burner).unwrap();
        assert_eq!(state.version(), 1);
        assert_eq!(state.chain_id().unwrap(), U256::from(412346u64));
        assert_eq!(state.burner().burned(), 2 * STORAGE_READ_COST);
    }

    #[test]
    fn open_uninitialized_state_fails() {
        let (_dir, store) = temp_store();
        let mut snapshot = store.snapshot().unwrap();
        let mut burner = SystemBurner::new(true, test_logger());
        assert!(SystemState::open(&mut snapshot, &mut burner).is_err());
    }

    #[test]
    fn read_only_burner_refuses_writes() {
        let (_dir, store) = temp_store();
        let mut writer = store.writer().unwrap();
        let mut burner = SystemBurner::new(true, test_logger());
        let err = match SystemState::initialize(&mut writer, &mut burner, 1, 1) {
            Ok(_) => panic!("read-only initialization must fail"),
            Err(err) => err,
        };
        assert!(err.downcast_ref::<WriteProtection>().is_some());
        assert_eq!(burner.burned(), 0);
    }

    #[test]
    fn writable_state_can_update_chain_id() {
        let (_dir, store) = temp_store();
        let mut writer = store.writer().unwrap();
        let mut burner = SystemBurner::new(false, test_logger());
        let mut state = SystemState::initialize(&mut writer, &mut burner, 1, 1).unwrap();
        state.set_chain_id(U256::from(7u64)).unwrap();
        assert_eq!(state.chain_id().unwrap(), U256::from(7u64));
    }
}
