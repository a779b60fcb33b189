//! Node bring-up.
//!
//! ## Stage Order
//!
//! ```text
//! 1. Validating              ─── normalized config, no resources touched
//!        ↓
//! 2. ResolvingWasmRoot       ─── may start the module-root check thread
//!        ↓
//! 3. BindingL1               ─── only with the L1 reader enabled
//!        ↓
//! 4. CreatingStack           ─── data dir, dev key, L2 wallet, database
//!        ↓
//! 5. InitializingChainState  ─── import, dev genesis or resume
//!        ↓
//! 6. VerifyingIdentity       ─── stored chain id == configured chain id
//!        ↓
//! 7. Assembling              ─── rollup engine registers node services
//! ```
//!
//! Any failure aborts bring-up; resources opened so far are released as the
//! partially built values are dropped. A fatal report from the module-root
//! check is picked up between stages.

use std::sync::Arc;

use chain::ChainConfig;
use crossbeam::channel::{self, Receiver};
use slog::Logger;

use crate::assembler::{DefaultRollupEngine, NodeInputs, RollupEngine};
use crate::config::NodeConfig;
use crate::error::{ConfigError, ConsistencyError, NodeError};
use crate::identity::verify_chain_identity;
use crate::init::{ChainStateInitializer, InitSource};
use crate::l1::L1ClientBinder;
use crate::lifecycle::{LifecycleManager, forward_os_signals, termination_channel};
use crate::stack::{NodeStack, StackConfig};
use crate::validate::validate;
use crate::wallet::{self, DEV_PRIVATE_KEY, DevKeystore};
use crate::wasm::{self, FileMachineLoader, MachineLoader};

/// Name of the chain database inside the data directory.
pub const CHAIN_DATABASE: &str = "l2chaindata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    ResolvingWasmRoot,
    BindingL1,
    CreatingStack,
    InitializingChainState,
    VerifyingIdentity,
    Assembling,
}

pub fn client_version() -> String {
    format!("l2-node/v{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for the bring-up sequence.
pub struct Bootstrap {
    config: NodeConfig,
    engine: Option<Box<dyn RollupEngine>>,
    machine_loader: Arc<dyn MachineLoader>,
    os_signals: bool,
    logger: Logger,
}

impl Bootstrap {
    pub fn new(config: NodeConfig, logger: &Logger) -> Self {
        Self {
            config,
            engine: None,
            machine_loader: Arc::new(FileMachineLoader),
            os_signals: false,
            logger: logger.new(slog::o!("component" => "bootstrap")),
        }
    }

    /// Replaces the [`DefaultRollupEngine`].
    pub fn with_engine(mut self, engine: Box<dyn RollupEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replaces the [`FileMachineLoader`] used by the module-root check.
    pub fn with_machine_loader(mut self, loader: Arc<dyn MachineLoader>) -> Self {
        self.machine_loader = loader;
        self
    }

    /// Forwards SIGINT/SIGTERM to the lifecycle manager.
    pub fn with_os_signals(mut self) -> Self {
        self.os_signals = true;
        self
    }

    /// Brings the node up to the point where it can be started.
    pub fn run(self) -> Result<LifecycleManager, NodeError> {
        let logger = self.logger.clone();
        let mut stage = Stage::Validating;
        let result = self.bring_up(&mut stage);
        if let Err(e) = &result {
            slog::error!(logger, "Bootstrap failed"; "stage" => ?stage, "error" => %e);
        }
        result
    }

    fn bring_up(self, stage: &mut Stage) -> Result<LifecycleManager, NodeError> {
        let logger = self.logger;
        let engine = self
            .engine
            .unwrap_or_else(|| Box::new(DefaultRollupEngine::new(&logger)));

        enter(stage, Stage::Validating, &logger);
        let config = self.config.normalize();
        validate(&config)?;
        let chain_config = ChainConfig::for_chain_id(config.l2.chain_id)
            .ok_or(ConfigError::UnknownChainId(config.l2.chain_id))?;

        // Until here signals keep their default action.
        let (termination, signals) = termination_channel();
        if self.os_signals {
            forward_os_signals(termination.clone(), logger.new(slog::o!("component" => "signals")))
                .map_err(NodeError::Resource)?;
        }

        enter(stage, Stage::ResolvingWasmRoot, &logger);
        let root = wasm::resolve(&config.node.wasm, &config.node.validator)?;
        slog::info!(
            logger,
            "Resolved validation machine";
            "root_path" => %root.root_path.display(),
            "module_root" => %root.module_root,
        );
        let (fatal_tx, fatal) = channel::bounded(1);
        let module_check = wasm::start_module_root_check(
            &root,
            &config.node.wasm,
            &config.node.validator,
            self.machine_loader,
            fatal_tx,
            &logger,
        )?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("l2-node")
            .build()
            .map_err(NodeError::resource)?;

        enter(stage, Stage::BindingL1, &logger);
        let l1 = runtime.block_on(L1ClientBinder::new(&logger).bind(&config))?;
        check_fatal(&fatal)?;

        enter(stage, Stage::CreatingStack, &logger);
        let mut stack = NodeStack::new(
            StackConfig {
                data_dir: config.persistent.chain.clone(),
                chain_id: config.l2.chain_id,
                http: config.http.clone(),
                ws: config.ws.clone(),
                client_version: client_version(),
            },
            runtime,
            &logger,
        )
        .map_err(NodeError::Resource)?;

        let dev_signer = wallet::dev_signer().map_err(NodeError::Resource)?;
        let dev_address = dev_signer.address();
        slog::info!(logger, "Dev node funded private key"; "priv" => DEV_PRIVATE_KEY);
        slog::info!(logger, "Funded public address"; "addr" => %dev_address);

        if !config.l2.wallet.pathname.is_empty() {
            let keystore = DevKeystore::open(&config.l2.wallet.pathname).map_err(NodeError::Resource)?;
            let account = keystore
                .find_or_import(&dev_signer, &config.l2.wallet.password)
                .map_err(NodeError::Resource)?;
            stack.add_account(account);
            slog::info!(logger, "Unlocked L2 wallet"; "address" => %account);
        }

        let store = stack
            .open_database(CHAIN_DATABASE)
            .map_err(NodeError::Resource)?;

        enter(stage, Stage::InitializingChainState, &logger);
        let source = InitSource::select(&config);
        let (chain, start_block) =
            ChainStateInitializer::new(chain_config, dev_address, &logger).initialize(&store, &source)?;
        slog::info!(logger, "Chain state ready"; "start_block" => start_block, "head" => %chain.head().hash());
        check_fatal(&fatal)?;

        enter(stage, Stage::VerifyingIdentity, &logger);
        verify_chain_identity(&chain, config.l2.chain_id, &logger)?;

        enter(stage, Stage::Assembling, &logger);
        let node = engine
            .create_node(
                &mut stack,
                NodeInputs {
                    chain,
                    store,
                    l1,
                    config: Arc::new(config),
                },
            )
            .map_err(NodeError::Resource)?;
        check_fatal(&fatal)?;

        Ok(LifecycleManager::new(
            stack,
            node,
            module_check,
            termination,
            signals,
            fatal,
            &logger,
        ))
    }
}

fn enter(current: &mut Stage, next: Stage, logger: &Logger) {
    *current = next;
    slog::debug!(logger, "Entering bootstrap stage"; "stage" => ?next);
}

fn check_fatal(fatal: &Receiver<ConsistencyError>) -> Result<(), NodeError> {
    match fatal.try_recv() {
        Ok(err) => Err(err.into()),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{NodeRoles, RollupNode};
    use crate::lifecycle::{StopReason, TerminationSignal};
    use crate::stack::NodeStack;
    use alloy_primitives::B256;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn dev_config(dir: &Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.sequencer.enable = true;
        config.node.wasm.root_path = Some(dir.join("machine"));
        config.persistent.chain = dir.join("data");
        config.dev_init = true;
        config
    }

    struct CountingEngine {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RollupEngine for CountingEngine {
        fn create_node(&self, _stack: &mut NodeStack, inputs: NodeInputs) -> anyhow::Result<RollupNode> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::ensure!(!self.fail, "engine refused");
            Ok(RollupNode {
                roles: NodeRoles::from_config(&inputs.config),
                chain: inputs.chain,
                l1: inputs.l1,
            })
        }
    }

    #[test]
    fn test_engine_receives_assembled_inputs() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            calls: Arc::clone(&calls),
            fail: false,
        };

        let mut manager = match Bootstrap::new(dev_config(dir.path()), &test_logger())
            .with_engine(Box::new(engine))
            .run()
        {
            Ok(manager) => manager,
            Err(e) => panic!("bring-up failed: {e}"),
        };
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let node = manager.node().unwrap();
        assert!(node.roles.sequencer);
        assert!(node.l1.is_none());
        assert_eq!(node.chain.head().number(), 0);

        manager
            .termination_sender()
            .deliver(TerminationSignal::Interrupt)
            .unwrap();
        assert!(matches!(manager.wait(), StopReason::Signal(_)));
        manager.shutdown().unwrap();
    }

    #[test]
    fn test_engine_failure_releases_store() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            calls: Arc::clone(&calls),
            fail: true,
        };

        match Bootstrap::new(dev_config(dir.path()), &test_logger())
            .with_engine(Box::new(engine))
            .run()
        {
            Err(NodeError::Resource(e)) => assert!(e.to_string().contains("engine refused")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bring-up succeeded with a failing engine"),
        }

        // The database lock was released, so a second bring-up can reopen it.
        let mut manager = match Bootstrap::new(dev_config(dir.path()), &test_logger()).run() {
            Ok(manager) => manager,
            Err(e) => panic!("second bring-up failed: {e}"),
        };
        manager.shutdown().unwrap();
    }

    #[test]
    fn test_pending_fatal_report_aborts() {
        let (tx, rx) = channel::bounded(1);
        assert!(check_fatal(&rx).is_ok());

        tx.send(ConsistencyError::ModuleRootMismatch {
            expected: B256::ZERO,
            found: B256::repeat_byte(1),
        })
        .unwrap();
        assert!(matches!(
            check_fatal(&rx),
            Err(NodeError::Consistency(ConsistencyError::ModuleRootMismatch { .. }))
        ));

        drop(tx);
        assert!(check_fatal(&rx).is_ok());
    }

    /// Threads of this process named like the signal forwarder. Thread names
    /// are truncated to 15 bytes in `/proc`.
    #[cfg(target_os = "linux")]
    fn signal_forwarder_threads() -> usize {
        std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|task| std::fs::read_to_string(task.ok()?.path().join("comm")).ok())
            .filter(|name| name.trim() == "signal-forwarde")
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_invalid_config_leaves_signals_alone() {
        let dir = TempDir::new().unwrap();
        let mut config = dev_config(dir.path());
        config.l2.chain_id = 7;

        match Bootstrap::new(config, &test_logger()).with_os_signals().run() {
            Err(NodeError::Config(ConfigError::UnknownChainId(7))) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bring-up accepted an unknown chain id"),
        }
        assert_eq!(signal_forwarder_threads(), 0);
        assert!(!dir.path().join("data").exists());
    }

    #[test]
    fn test_client_version_names_binary() {
        assert!(client_version().starts_with("l2-node/v"));
    }
}
