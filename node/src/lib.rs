//! Node crate - bootstrap and lifecycle control for the L2 node.
//!
//! This crate turns a [`NodeConfig`] into a running node:
//!
//! - **Validation**: role combinations and data availability mode
//! - **Wasm root**: validation machine location and expected module root
//! - **L1 binding**: client, deployment addresses and transaction signer
//! - **Stack**: data directory, chain database, HTTP/WS RPC endpoints
//! - **Chain state**: snapshot import, dev genesis or resume
//! - **Lifecycle**: start, wait for a termination signal, ordered shutdown
//!
//! ## Quick Start
//!
//! ```ignore
//! use node::{Bootstrap, NodeConfig};
//!
//! let mut config = NodeConfig::from_path("node.toml")?;
//! config.dev_init = true;
//!
//! let manager = Bootstrap::new(config, &logger).with_os_signals().run()?;
//!
//! // Blocks until SIGINT/SIGTERM, then closes the stack.
//! manager.run()?;
//! ```
//!
//! See the [`bootstrap`] module for the stage order and the [`stack`] module
//! for the shutdown order.

pub mod assembler;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod identity;
pub mod init;
pub mod l1;
pub mod lifecycle;
pub mod stack;
pub mod validate;
pub mod wallet;
pub mod wasm;

pub use assembler::{DefaultRollupEngine, NodeInputs, NodeRoles, RollupEngine, RollupNode};
pub use bootstrap::{Bootstrap, CHAIN_DATABASE, Stage};
pub use config::NodeConfig;
pub use error::{ConfigError, ConsistencyError, InitError, NodeError};
pub use l1::{L1Bindings, RollupAddresses, TransactOpts};
pub use lifecycle::{
    DeliveryError, LifecycleManager, LifecycleState, StopReason, TerminationSender, TerminationSignal,
};
pub use stack::{NodeStack, Service, StackConfig};
pub use wasm::{FileMachineLoader, MachineConfig, MachineLoader, WasmRoot};
