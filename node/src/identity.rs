//! Chain identity verification.

use alloy_primitives::U256;
use chain::{BlockChain, SystemBurner, SystemState};
use slog::Logger;

use crate::error::{ConsistencyError, NodeError};

/// Compares the chain id recorded in system state with the configured one.
pub fn check_chain_id(stored: U256, configured: u64) -> Result<(), ConsistencyError> {
    if stored == U256::from(configured) {
        Ok(())
    } else {
        Err(ConsistencyError::ChainIdMismatch { configured, stored })
    }
}

/// Reads the recorded chain id through a read-only view of the head state.
pub fn verify_chain_identity(chain: &BlockChain, configured: u64, logger: &Logger) -> Result<(), NodeError> {
    let mut snapshot = chain.state().map_err(NodeError::Resource)?;
    let mut burner = SystemBurner::new(true, logger.new(slog::o!("component" => "burner")));
    let stored = {
        let mut system = SystemState::open(&mut snapshot, &mut burner).map_err(NodeError::Resource)?;
        system.chain_id().map_err(NodeError::Resource)?
    };
    check_chain_id(stored, configured)?;
    slog::info!(logger, "Verified chain identity"; "chain_id" => configured, "head" => chain.head().number());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use chain::{ChainConfig, ChainStore};

    use crate::init::{ChainStateInitializer, InitSource};

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn test_check_chain_id() {
        assert!(check_chain_id(U256::from(412346u64), 412346).is_ok());
        for (stored, configured) in [(412346u64, 412345u64), (42161, 412346), (0, 1)] {
            assert_eq!(
                check_chain_id(U256::from(stored), configured),
                Err(ConsistencyError::ChainIdMismatch {
                    configured,
                    stored: U256::from(stored),
                })
            );
        }
    }

    #[test]
    fn test_verify_against_materialized_chain() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        let initializer = ChainStateInitializer::new(
            ChainConfig::for_chain_id(412346).unwrap(),
            Address::repeat_byte(1),
            &test_logger(),
        );
        let (chain, _) = initializer.initialize(&store, &InitSource::DevGenesis).unwrap();

        verify_chain_identity(&chain, 412346, &test_logger()).unwrap();
        assert!(matches!(
            verify_chain_identity(&chain, 42161, &test_logger()),
            Err(NodeError::Consistency(ConsistencyError::ChainIdMismatch { .. }))
        ));
    }
}
