//! JSON-RPC namespaces served over the chain store.
//!
//! Each namespace is its own `#[rpc(server)]` trait so a transport can merge
//! only the namespaces enabled in its configuration.

use alloy_primitives::{Address, U64, U256};
use anyhow::Result;
use chain::ChainStore;
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::types::error::INVALID_PARAMS_CODE;
use jsonrpsee::{Methods, RpcModule};
use slog::Logger;

/// Generic server-side failure, as used by Ethereum clients.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// Namespaces known to [`RpcApi::module`].
pub const NAMESPACES: [&str; 4] = ["eth", "net", "web3", "personal"];

#[rpc(server, namespace = "eth")]
pub trait EthApi {
    #[method(name = "chainId")]
    fn chain_id(&self) -> RpcResult<U64>;

    #[method(name = "blockNumber", blocking)]
    fn block_number(&self) -> RpcResult<U64>;

    #[method(name = "getBalance", blocking)]
    fn balance(&self, address: Address, block: Option<String>) -> RpcResult<U256>;

    #[method(name = "getTransactionCount", blocking)]
    fn transaction_count(&self, address: Address, block: Option<String>) -> RpcResult<U64>;
}

#[rpc(server, namespace = "net")]
pub trait NetApi {
    /// Network id, which is the L2 chain id in decimal.
    #[method(name = "version")]
    fn version(&self) -> RpcResult<String>;
}

#[rpc(server, namespace = "web3")]
pub trait Web3Api {
    #[method(name = "clientVersion")]
    fn client_version(&self) -> RpcResult<String>;
}

#[rpc(server, namespace = "personal")]
pub trait PersonalApi {
    /// Accounts unlocked in the node's L2 wallet.
    #[method(name = "listAccounts")]
    fn list_accounts(&self) -> RpcResult<Vec<Address>>;
}

/// Read-only API served by both transports.
#[derive(Clone)]
pub struct RpcApi {
    store: ChainStore,
    chain_id: u64,
    accounts: Vec<Address>,
    client_version: String,
    logger: Logger,
}

impl RpcApi {
    pub fn new(
        store: ChainStore,
        chain_id: u64,
        accounts: Vec<Address>,
        client_version: impl Into<String>,
        logger: Logger,
    ) -> Self {
        Self {
            store,
            chain_id,
            accounts,
            client_version: client_version.into(),
            logger,
        }
    }

    /// Builds a module holding only the given namespaces.
    ///
    /// Unknown namespaces are skipped with a warning; repeated ones are merged once.
    pub fn module(&self, namespaces: &[String]) -> Result<RpcModule<()>> {
        let mut module = RpcModule::new(());
        let mut merged: Vec<&str> = Vec::new();
        for namespace in namespaces {
            let namespace = namespace.trim();
            if merged.contains(&namespace) {
                continue;
            }
            let methods: Methods = match namespace {
                "eth" => EthApiServer::into_rpc(self.clone()).into(),
                "net" => NetApiServer::into_rpc(self.clone()).into(),
                "web3" => Web3ApiServer::into_rpc(self.clone()).into(),
                "personal" => PersonalApiServer::into_rpc(self.clone()).into(),
                other => {
                    slog::warn!(self.logger, "Ignoring unknown RPC namespace"; "namespace" => other);
                    continue;
                }
            };
            module.merge(methods)?;
            merged.push(namespace);
        }
        Ok(module)
    }

    fn head_number(&self) -> RpcResult<u64> {
        let head = self.store.head_block().map_err(|e| self.internal(e))?;
        Ok(head.map(|block| block.number()).unwrap_or_default())
    }

    /// Only the head state is kept, so any other block is refused.
    fn check_block(&self, block: Option<&str>) -> RpcResult<()> {
        match block {
            None | Some("latest" | "pending" | "safe" | "finalized") => Ok(()),
            Some(tag) => {
                let requested = parse_quantity(tag).ok_or_else(|| {
                    ErrorObjectOwned::owned(
                        INVALID_PARAMS_CODE,
                        format!("invalid block tag {tag:?}"),
                        None::<()>,
                    )
                })?;
                if requested == self.head_number()? {
                    Ok(())
                } else {
                    Err(ErrorObjectOwned::owned(
                        SERVER_ERROR_CODE,
                        "historical state is not available",
                        None::<()>,
                    ))
                }
            }
        }
    }

    fn account(&self, address: &Address, block: Option<&str>) -> RpcResult<Option<chain::Account>> {
        self.check_block(block)?;
        self.store.get_account(address).map_err(|e| self.internal(e))
    }

    fn internal(&self, err: anyhow::Error) -> ErrorObjectOwned {
        slog::warn!(self.logger, "RPC store read failed"; "error" => %format!("{err:#}"));
        ErrorObjectOwned::owned(SERVER_ERROR_CODE, format!("{err:#}"), None::<()>)
    }
}

impl EthApiServer for RpcApi {
    fn chain_id(&self) -> RpcResult<U64> {
        Ok(U64::from(self.chain_id))
    }

    fn block_number(&self) -> RpcResult<U64> {
        self.head_number().map(U64::from)
    }

    fn balance(&self, address: Address, block: Option<String>) -> RpcResult<U256> {
        let account = self.account(&address, block.as_deref())?;
        Ok(account.map(|account| account.balance()).unwrap_or(U256::ZERO))
    }

    fn transaction_count(&self, address: Address, block: Option<String>) -> RpcResult<U64> {
        let account = self.account(&address, block.as_deref())?;
        Ok(U64::from(account.map(|account| account.nonce).unwrap_or_default()))
    }
}

impl NetApiServer for RpcApi {
    fn version(&self) -> RpcResult<String> {
        Ok(self.chain_id.to_string())
    }
}

impl Web3ApiServer for RpcApi {
    fn client_version(&self) -> RpcResult<String> {
        Ok(self.client_version.clone())
    }
}

impl PersonalApiServer for RpcApi {
    fn list_accounts(&self) -> RpcResult<Vec<Address>> {
        Ok(self.accounts.clone())
    }
}

fn parse_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}
