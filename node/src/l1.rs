//! L1 client binding.
//!
//! Only nodes that read from L1 dial it. Signing options are derived when the
//! node posts batches or validates, and the rollup deployment document is
//! always required alongside the client.

use std::fs;

use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use slog::Logger;
use url::Url;

use crate::config::NodeConfig;
use crate::error::{ConfigError, ConsistencyError, NodeError};
use crate::wallet;

/// Addresses of the rollup contracts on L1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RollupAddresses {
    pub bridge: Address,
    pub inbox: Address,
    pub sequencer_inbox: Address,
    pub rollup: Address,
    pub validator_utils: Address,
    pub validator_wallet_creator: Address,
    pub deployed_at: u64,
}

/// Signing options for L1 transactions.
#[derive(Clone)]
pub struct TransactOpts {
    pub signer: PrivateKeySigner,
    pub chain_id: u64,
}

impl TransactOpts {
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

impl std::fmt::Debug for TransactOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactOpts")
            .field("from", &self.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Everything bound from L1 for the node.
#[derive(Clone)]
pub struct L1Bindings {
    pub client: DynProvider,
    pub deployment: RollupAddresses,
    pub transact_opts: Option<TransactOpts>,
}

/// Dials L1 and gathers the L1-facing inputs of the node.
pub struct L1ClientBinder {
    logger: Logger,
}

impl L1ClientBinder {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.new(slog::o!("component" => "l1")),
        }
    }

    /// Returns `None` when the L1 reader is disabled.
    pub async fn bind(&self, config: &NodeConfig) -> Result<Option<L1Bindings>, NodeError> {
        if !config.node.l1_reader.enable {
            slog::info!(self.logger, "L1 reader disabled, not connecting to L1");
            return Ok(None);
        }

        let url = Url::parse(&config.l1.url)
            .with_context(|| format!("Invalid L1 url {}", config.l1.url))
            .map_err(NodeError::Resource)?;
        let client = ProviderBuilder::new().connect_http(url).erased();
        let actual = client
            .get_chain_id()
            .await
            .with_context(|| format!("Failed to dial L1 at {}", config.l1.url))
            .map_err(NodeError::Resource)?;
        // A configured chain id of 0 accepts whatever the endpoint reports.
        if config.l1.chain_id != 0 && actual != config.l1.chain_id {
            return Err(ConsistencyError::L1ChainIdMismatch {
                configured: config.l1.chain_id,
                actual,
            }
            .into());
        }
        slog::info!(self.logger, "Connected to L1"; "url" => &config.l1.url, "chain_id" => actual);

        let transact_opts = if config.node.batch_poster.enable || config.node.validator.enable {
            let signer = wallet::unlock_keystore(&config.l1.wallet).map_err(NodeError::Resource)?;
            slog::info!(self.logger, "Unlocked L1 wallet"; "address" => %signer.address());
            Some(TransactOpts {
                signer,
                chain_id: config.l1.chain_id,
            })
        } else {
            None
        };

        let deployment = load_deployment(&config.l1.deployment)?;
        slog::info!(
            self.logger,
            "Loaded rollup deployment";
            "rollup" => %deployment.rollup,
            "deployed_at" => deployment.deployed_at,
        );

        Ok(Some(L1Bindings {
            client,
            deployment,
            transact_opts,
        }))
    }
}

/// Reads and decodes the deployment document.
pub fn load_deployment(path: &str) -> Result<RollupAddresses, NodeError> {
    if path.is_empty() {
        return Err(ConfigError::MissingDeployment.into());
    }
    let raw = fs::read(path)
        .with_context(|| format!("Failed to read deployment {path}"))
        .map_err(NodeError::Resource)?;
    serde_json::from_slice(&raw).map_err(|e| ConsistencyError::Deployment(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    const DEPLOYMENT: &str = r#"{
        "bridge": "0x0000000000000000000000000000000000000001",
        "inbox": "0x0000000000000000000000000000000000000002",
        "sequencer-inbox": "0x0000000000000000000000000000000000000003",
        "rollup": "0x0000000000000000000000000000000000000004",
        "validator-utils": "0x0000000000000000000000000000000000000005",
        "validator-wallet-creator": "0x0000000000000000000000000000000000000006",
        "deployed-at": 1234
    }"#;

    #[test]
    fn test_load_deployment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEPLOYMENT.as_bytes()).unwrap();

        let deployment = load_deployment(file.path().to_str().unwrap()).unwrap();
        assert_eq!(deployment.sequencer_inbox, Address::with_last_byte(3));
        assert_eq!(deployment.validator_wallet_creator, Address::with_last_byte(6));
        assert_eq!(deployment.deployed_at, 1234);
    }

    #[test]
    fn test_deployment_error_categories() {
        assert!(matches!(
            load_deployment(""),
            Err(NodeError::Config(ConfigError::MissingDeployment))
        ));
        assert!(matches!(
            load_deployment("/nonexistent/deployment.json"),
            Err(NodeError::Resource(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"bridge\": 5}").unwrap();
        assert!(matches!(
            load_deployment(file.path().to_str().unwrap()),
            Err(NodeError::Consistency(ConsistencyError::Deployment(_)))
        ));
    }

    #[tokio::test]
    async fn test_reader_disabled_skips_l1() {
        let binder = L1ClientBinder::new(&test_logger());
        let bindings = binder.bind(&NodeConfig::default()).await.unwrap();
        assert!(bindings.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_l1_is_resource_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = NodeConfig::default();
        config.node.l1_reader.enable = true;
        config.l1.url = format!("http://127.0.0.1:{port}");

        let binder = L1ClientBinder::new(&test_logger());
        assert!(matches!(
            binder.bind(&config).await,
            Err(NodeError::Resource(_))
        ));
    }
}
