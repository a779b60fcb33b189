//! Configuration validation.
//!
//! [`validate`] is pure: it inspects a normalized [`NodeConfig`] and touches no
//! resource, so a rejected configuration never opens the store or dials L1.

use chain::ChainConfig;

use crate::config::NodeConfig;
use crate::error::ConfigError;

/// Checks the role and endpoint invariants of `config`.
pub fn validate(config: &NodeConfig) -> Result<(), ConfigError> {
    let role = &config.node;

    if role.sequencer.enable {
        if role.forwarding_configured() {
            return Err(ConfigError::ForwardingTargetWithSequencer);
        }
    } else if role.forwarding_target.is_empty() {
        return Err(ConfigError::MissingForwardingTarget);
    }

    if role.validator.enable {
        if !role.l1_reader.enable {
            return Err(ConfigError::ValidatorWithoutL1Reader);
        }
        if !role.block_validator.enable && !role.validator.without_block_validator {
            return Err(ConfigError::ValidatorWithoutBlockValidator);
        }
    }

    role.data_availability.mode()?;

    if ChainConfig::for_chain_id(config.l2.chain_id).is_none() {
        return Err(ConfigError::UnknownChainId(config.l2.chain_id));
    }

    if role.l1_reader.enable && config.l1.url.is_empty() {
        return Err(ConfigError::MissingL1Url);
    }

    Ok(())
}
