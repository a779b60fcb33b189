//! Error types for node bring-up.
//!
//! Every failure during bring-up is fatal and surfaces as a [`NodeError`] at the
//! single top-level handler in `main`.

use alloy_primitives::{B256, U256};
use thiserror::Error;

/// Logically inconsistent or incomplete configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Sequencing locally while also forwarding elsewhere.
    #[error("forwarding target set when sequencer enabled")]
    ForwardingTargetWithSequencer,

    /// Neither sequencing nor forwarding.
    #[error("forwarding target unset, and not sequencer (can set to \"null\" to disable forwarding)")]
    MissingForwardingTarget,

    /// The validator role needs the L1 reader.
    #[error("validator must read from L1")]
    ValidatorWithoutL1Reader,

    /// The validator role needs the block validator unless explicitly opted out.
    #[error("L1 validator requires block validator to safely function")]
    ValidatorWithoutBlockValidator,

    /// The data-availability settings do not resolve to a mode.
    #[error("invalid data availability configuration: {0}")]
    DataAvailability(String),

    /// No chain parameters exist for the configured L2 chain id.
    #[error("unsupported L2 chain id {0}")]
    UnknownChainId(u64),

    /// The L1 reader is enabled without an endpoint.
    #[error("L1 reader enabled but no L1 url configured")]
    MissingL1Url,

    /// The L1 reader is enabled without a deployment document.
    #[error("no deployment specified")]
    MissingDeployment,
}

/// No usable initialization source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("no initialization mode supplied, no blocks in database")]
    NoInitializationMode,
}

/// Persisted or external state disagrees with the configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("attempted to launch node with chain ID {configured} on state with chain ID {stored}")]
    ChainIdMismatch { configured: u64, stored: U256 },

    #[error("incompatible wasm module root expected: {expected} found {found}")]
    ModuleRootMismatch { expected: B256, found: B256 },

    #[error("invalid wasm module root {0:?}")]
    InvalidModuleRoot(String),

    #[error("failed reading wasm module root from machine: {0}")]
    MachineLoad(String),

    #[error("undecodable deployment document: {0}")]
    Deployment(String),

    #[error("L1 endpoint reports chain ID {actual}, configured {configured}")]
    L1ChainIdMismatch { configured: u64, actual: u64 },

    #[error("{0}")]
    GenesisMismatch(String),
}

/// Top-level bring-up error.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store, key material, input files or network endpoints.
    #[error("resource error: {0:#}")]
    Resource(anyhow::Error),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Streaming or materializing imported blocks failed.
    #[error("import error: {0:#}")]
    Import(anyhow::Error),

    #[error("initialization error: {0}")]
    Init(#[from] InitError),
}

impl NodeError {
    pub fn resource(err: impl Into<anyhow::Error>) -> Self {
        Self::Resource(err.into())
    }

    /// Configuration errors are reported together with usage help.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_mismatch_names_both_ids() {
        let err = ConsistencyError::ChainIdMismatch {
            configured: 412346,
            stored: U256::from(42161u64),
        };
        let text = err.to_string();
        assert!(text.contains("412346"));
        assert!(text.contains("42161"));
    }

    #[test]
    fn test_resource_error_keeps_context_chain() {
        let err = NodeError::resource(
            anyhow::anyhow!("permission denied").context("Failed to open chain store"),
        );
        assert_eq!(
            err.to_string(),
            "resource error: Failed to open chain store: permission denied"
        );
        assert!(!err.is_usage_error());
        assert!(NodeError::from(ConfigError::MissingL1Url).is_usage_error());
    }
}
