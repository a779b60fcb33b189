//! Node assembly.
//!
//! The rollup engine is consumed through [`RollupEngine`]: given validated
//! inputs it registers the node's services on the stack and returns the
//! assembled node. [`DefaultRollupEngine`] follows the L1 head when an L1
//! client is bound.

use std::sync::Arc;
use std::time::Duration;

use alloy_provider::{DynProvider, Provider};
use anyhow::{Context, Result};
use chain::{BlockChain, ChainStore};
use slog::{Logger, o};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::l1::L1Bindings;
use crate::stack::{NodeStack, Service};

/// Default interval between L1 head polls.
pub const L1_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Validated inputs handed to the engine.
pub struct NodeInputs {
    pub chain: BlockChain,
    pub store: ChainStore,
    pub l1: Option<L1Bindings>,
    pub config: Arc<NodeConfig>,
}

/// Roles the assembled node runs with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRoles {
    pub sequencer: bool,
    pub forwarding_target: Option<String>,
    pub batch_poster: bool,
    pub validator: bool,
    pub block_validator: bool,
    pub l1_reader: bool,
}

impl NodeRoles {
    pub fn from_config(config: &NodeConfig) -> Self {
        let role = &config.node;
        Self {
            sequencer: role.sequencer.enable,
            forwarding_target: role
                .forwarding_configured()
                .then(|| role.forwarding_target.clone()),
            batch_poster: role.batch_poster.enable,
            validator: role.validator.enable,
            block_validator: role.block_validator.enable,
            l1_reader: role.l1_reader.enable,
        }
    }
}

/// The assembled rollup node.
pub struct RollupNode {
    pub chain: BlockChain,
    pub roles: NodeRoles,
    pub l1: Option<L1Bindings>,
}

/// Constructs the running node from validated inputs.
pub trait RollupEngine: Send + Sync {
    fn create_node(&self, stack: &mut NodeStack, inputs: NodeInputs) -> Result<RollupNode>;
}

pub struct DefaultRollupEngine {
    poll_interval: Duration,
    logger: Logger,
}

impl DefaultRollupEngine {
    pub fn new(logger: &Logger) -> Self {
        Self {
            poll_interval: L1_POLL_INTERVAL,
            logger: logger.new(o!("component" => "rollup")),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl RollupEngine for DefaultRollupEngine {
    fn create_node(&self, stack: &mut NodeStack, inputs: NodeInputs) -> Result<RollupNode> {
        let roles = NodeRoles::from_config(&inputs.config);

        if let Some(l1) = &inputs.l1 {
            stack.register_service(Box::new(L1HeadFollower::new(
                l1.client.clone(),
                self.poll_interval,
                self.logger.new(o!("service" => "l1-head")),
            )))?;
        }

        slog::info!(
            self.logger,
            "Created rollup node";
            "sequencer" => roles.sequencer,
            "forwarding_target" => roles.forwarding_target.as_deref().unwrap_or("none"),
            "batch_poster" => roles.batch_poster,
            "validator" => roles.validator,
            "block_validator" => roles.block_validator,
            "l1_reader" => roles.l1_reader,
            "head" => inputs.chain.head().number(),
            "db" => %inputs.store.path().display(),
        );

        Ok(RollupNode {
            chain: inputs.chain,
            roles,
            l1: inputs.l1,
        })
    }
}

/// Polls the L1 head and logs when it advances.
pub struct L1HeadFollower {
    client: DynProvider,
    interval: Duration,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    logger: Logger,
}

impl L1HeadFollower {
    pub fn new(client: DynProvider, interval: Duration, logger: Logger) -> Self {
        Self {
            client,
            interval,
            shutdown: Arc::new(Notify::new()),
            task: None,
            logger,
        }
    }
}

impl Service for L1HeadFollower {
    fn name(&self) -> &'static str {
        "l1-head-follower"
    }

    fn start(&mut self, runtime: &Handle) -> Result<()> {
        anyhow::ensure!(self.task.is_none(), "already started");
        let client = self.client.clone();
        let interval = self.interval;
        let shutdown = Arc::clone(&self.shutdown);
        let logger = self.logger.clone();

        self.task = Some(runtime.spawn(async move {
            let mut last_seen = None;
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match client.get_block_number().await {
                    Ok(head) if last_seen != Some(head) => {
                        slog::debug!(logger, "L1 head advanced"; "number" => head);
                        last_seen = Some(head);
                    }
                    Ok(_) => {}
                    Err(e) => slog::warn!(logger, "Failed to poll L1 head"; "error" => %e),
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self, runtime: &Handle) -> Result<()> {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            runtime
                .block_on(task)
                .context("L1 head follower task panicked")?;
        }
        Ok(())
    }
}
