//! Chain parameters keyed by chain id.

/// Static parameters of a known L2 chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: &'static str,
    /// System-state version written at genesis.
    pub initial_version: u64,
}

const KNOWN_CHAINS: &[ChainConfig] = &[
    ChainConfig {
        chain_id: 42161,
        name: "arb1",
        initial_version: 1,
    },
    ChainConfig {
        chain_id: 421611,
        name: "rinkeby-testnet",
        initial_version: 1,
    },
    ChainConfig {
        chain_id: 412345,
        name: "dev-rollup",
        initial_version: 1,
    },
    ChainConfig {
        chain_id: 412346,
        name: "dev-test",
        initial_version: 1,
    },
];

impl ChainConfig {
    /// Looks up the parameters of a known chain.
    pub fn for_chain_id(chain_id: u64) -> Option<Self> {
        KNOWN_CHAINS
            .iter()
            .find(|config| config.chain_id == chain_id)
            .cloned()
    }

    /// Chain ids this build knows how to run.
    pub fn known_chain_ids() -> impl Iterator<Item = u64> {
        KNOWN_CHAINS.iter().map(|config| config.chain_id)
    }
}
