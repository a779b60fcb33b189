//! Node configuration types.
//!
//! Everything the controller needs lives in one [`NodeConfig`]. It is layered
//! from built-in defaults, an optional TOML/YAML file and `L2NODE_`-prefixed
//! environment variables, then adjusted by command-line flags. After
//! [`NodeConfig::normalize`] and validation the value is never mutated again.

use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use rpc::{HttpConfig, WsConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix; nesting uses `__`, e.g. `L2NODE_NODE__SEQUENCER__ENABLE`.
pub const ENV_PREFIX: &str = "L2NODE_";

/// Forwarding target value that explicitly disables forwarding.
pub const FORWARDING_DISABLED: &str = "null";

/// Complete node configuration.
///
/// # Example TOML
///
/// ```toml
/// dev_init = true
///
/// [node.sequencer]
/// enable = true
///
/// [l2]
/// chain_id = 412346
///
/// [persistent]
/// chain = "/var/lib/l2-node"
///
/// [http]
/// addr = "127.0.0.1"
/// port = 8547
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Roles and role-specific settings.
    pub node: NodeRoleConfig,

    /// External ledger connection.
    pub l1: L1Config,

    /// Local chain identity.
    pub l2: L2Config,

    /// On-disk locations.
    pub persistent: PersistentConfig,

    pub http: HttpConfig,
    pub ws: WsConfig,

    /// JSON initialization snapshot to import.
    pub import_file: Option<PathBuf>,

    /// Start from the single-account development genesis.
    pub dev_init: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            node: NodeRoleConfig::default(),
            l1: L1Config::default(),
            l2: L2Config::default(),
            persistent: PersistentConfig::default(),
            http: HttpConfig::default(),
            ws: WsConfig::default(),
            import_file: None,
            dev_init: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRoleConfig {
    /// Run without an L1 connection: sequence locally, never post batches.
    pub no_l1_listener: bool,
    pub l1_reader: L1ReaderConfig,
    pub sequencer: SequencerConfig,
    /// External sequencer to relay transactions to; `"null"` disables forwarding.
    pub forwarding_target: String,
    pub batch_poster: BatchPosterConfig,
    pub validator: ValidatorConfig,
    pub block_validator: BlockValidatorConfig,
    pub data_availability: DataAvailabilityConfig,
    pub wasm: WasmConfig,
}

impl NodeRoleConfig {
    /// Whether a forwarding target is set. The literal `"null"` counts as unset.
    pub fn forwarding_configured(&self) -> bool {
        !self.forwarding_target.is_empty() && self.forwarding_target != FORWARDING_DISABLED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct L1ReaderConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPosterConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub enable: bool,
    /// Run the validator without the block validator (unsafe).
    pub without_block_validator: bool,
}

impl ValidatorConfig {
    /// The validator runs with block validation, so the validation machine must match.
    pub fn requires_machine(&self) -> bool {
        self.enable && !self.without_block_validator
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockValidatorConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataAvailabilityConfig {
    /// `onchain` or `local`.
    pub mode: String,
    pub local_disk: LocalDiskConfig,
}

impl Default for DataAvailabilityConfig {
    fn default() -> Self {
        Self {
            mode: "onchain".to_string(),
            local_disk: LocalDiskConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDiskConfig {
    pub data_dir: String,
}

/// Resolved data-availability mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAvailabilityMode {
    OnChain,
    Local { data_dir: PathBuf },
}

impl DataAvailabilityConfig {
    pub fn mode(&self) -> Result<DataAvailabilityMode, ConfigError> {
        match self.mode.to_ascii_lowercase().as_str() {
            "onchain" => Ok(DataAvailabilityMode::OnChain),
            "local" if self.local_disk.data_dir.is_empty() => Err(ConfigError::DataAvailability(
                "local data availability requires local_disk.data_dir".to_string(),
            )),
            "local" => Ok(DataAvailabilityMode::Local {
                data_dir: PathBuf::from(&self.local_disk.data_dir),
            }),
            other => Err(ConfigError::DataAvailability(format!(
                "unknown data availability mode {other:?}"
            ))),
        }
    }
}

/// Validation-machine locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// Machine directory; defaults to `<install dir>/machine`.
    pub root_path: Option<PathBuf>,
    /// Expected module root; defaults to the `module_root` file in the machine directory.
    pub module_root: Option<String>,
    /// Cached initial machine image to load instead of the replay binary.
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    pub url: String,
    pub chain_id: u64,
    /// Path to the deployment document.
    pub deployment: String,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    pub chain_id: u64,
    pub wallet: WalletConfig,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            chain_id: 412346,
            wallet: WalletConfig::default(),
        }
    }
}

/// Keystore location and credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Keystore file or directory.
    pub pathname: String,
    /// Address selecting the key; empty picks the first key found.
    pub account: String,
    pub password: String,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("pathname", &self.pathname)
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Data directory of the node stack.
    pub chain: PathBuf,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            chain: PathBuf::from("./l2-data"),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a file path.
    ///
    /// Supports TOML (.toml) and YAML (.yaml, .yml) formats.
    /// Environment variables can override file values using the `L2NODE_` prefix.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut figment = Figment::from(Serialized::defaults(NodeConfig::default()));

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            figment = match ext {
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                _ => {
                    return Err(anyhow::anyhow!(
                        "Unsupported config file format: {}. Use .toml, .yaml, or .yml",
                        ext
                    ));
                }
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: NodeConfig = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from defaults and environment variables only.
    pub fn from_env() -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(NodeConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: NodeConfig = figment.extract()?;
        Ok(config)
    }

    /// Applies the no-L1-listener override.
    ///
    /// Without an L1 listener the node sequences locally: the L1 reader and
    /// batch poster are off and the sequencer is on.
    pub fn normalize(mut self) -> Self {
        if self.node.no_l1_listener {
            self.node.l1_reader.enable = false;
            self.node.sequencer.enable = true;
            self.node.batch_poster.enable = false;
        }
        self
    }
}
