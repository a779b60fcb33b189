//! Lifecycle of the assembled node.
//!
//! ```text
//! Starting ──▶ Running ──▶ ShuttingDown ──▶ Terminated
//! ```
//!
//! While running, the manager blocks on the single-slot termination channel
//! and on fatal reports from the module-root check. After the first signal
//! the receiving end is dropped, so a second signal cannot be delivered and
//! the signal forwarder aborts the process.

use std::thread;

use anyhow::Context;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use slog::Logger;

use crate::assembler::RollupNode;
use crate::error::{ConsistencyError, NodeError};
use crate::stack::NodeStack;
use crate::wasm::ModuleRootCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Terminated,
}

/// OS signal that requests termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

/// Why a signal could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// A signal is already pending.
    Full,
    /// The receiver is gone: termination is already in progress.
    Closed,
}

/// Sending half of the termination channel.
#[derive(Clone)]
pub struct TerminationSender {
    inner: Sender<TerminationSignal>,
}

impl TerminationSender {
    pub fn deliver(&self, signal: TerminationSignal) -> Result<(), DeliveryError> {
        self.inner.try_send(signal).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

/// Single-slot termination channel.
pub fn termination_channel() -> (TerminationSender, Receiver<TerminationSignal>) {
    let (tx, rx) = channel::bounded(1);
    (TerminationSender { inner: tx }, rx)
}

/// Delivers `signal`, calling `on_duplicate` if termination is already under way.
///
/// A signal arriving while another is still pending is dropped.
pub fn dispatch<F: FnOnce()>(sender: &TerminationSender, signal: TerminationSignal, on_duplicate: F) {
    match sender.deliver(signal) {
        Ok(()) | Err(DeliveryError::Full) => {}
        Err(DeliveryError::Closed) => on_duplicate(),
    }
}

/// Forwards SIGINT and SIGTERM into the termination channel.
///
/// A signal received after termination started aborts the process.
#[cfg(unix)]
pub fn forward_os_signals(sender: TerminationSender, logger: Logger) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    // Register before returning so no early signal is missed.
    let (mut interrupt, mut terminate) = runtime.block_on(async {
        Ok::<_, std::io::Error>((signal(SignalKind::interrupt())?, signal(SignalKind::terminate())?))
    })?;

    thread::Builder::new()
        .name("signal-forwarder".into())
        .spawn(move || {
            runtime.block_on(async move {
                loop {
                    let received = tokio::select! {
                        _ = interrupt.recv() => TerminationSignal::Interrupt,
                        _ = terminate.recv() => TerminationSignal::Terminate,
                    };
                    slog::info!(logger, "Received termination signal"; "signal" => ?received);
                    dispatch(&sender, received, || {
                        slog::crit!(logger, "Signal received during shutdown, aborting");
                        std::process::abort();
                    });
                }
            });
        })
        .context("Failed to spawn signal forwarder thread")?;
    Ok(())
}

#[cfg(not(unix))]
pub fn forward_os_signals(sender: TerminationSender, logger: Logger) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    thread::Builder::new()
        .name("signal-forwarder".into())
        .spawn(move || {
            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    slog::info!(logger, "Received termination signal");
                    dispatch(&sender, TerminationSignal::Interrupt, || {
                        slog::crit!(logger, "Signal received during shutdown, aborting");
                        std::process::abort();
                    });
                }
            });
        })
        .context("Failed to spawn signal forwarder thread")?;
    Ok(())
}

/// How the running phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Signal(TerminationSignal),
    /// Every termination sender was dropped.
    SignalSourceClosed,
    Fatal(ConsistencyError),
}

/// Owns the assembled node and drives it through its lifecycle.
pub struct LifecycleManager {
    state: LifecycleState,
    stack: NodeStack,
    node: Option<RollupNode>,
    module_check: Option<ModuleRootCheck>,
    signals: Option<Receiver<TerminationSignal>>,
    termination: TerminationSender,
    fatal: Receiver<ConsistencyError>,
    logger: Logger,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stack: NodeStack,
        node: RollupNode,
        module_check: Option<ModuleRootCheck>,
        termination: TerminationSender,
        signals: Receiver<TerminationSignal>,
        fatal: Receiver<ConsistencyError>,
        logger: &Logger,
    ) -> Self {
        Self {
            state: LifecycleState::Starting,
            stack,
            node: Some(node),
            module_check,
            signals: Some(signals),
            termination,
            fatal,
            logger: logger.new(slog::o!("component" => "lifecycle")),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Handle for requesting termination, as the signal forwarder does.
    pub fn termination_sender(&self) -> TerminationSender {
        self.termination.clone()
    }

    pub fn node(&self) -> Option<&RollupNode> {
        self.node.as_ref()
    }

    pub fn http_endpoint(&self) -> Option<&str> {
        self.stack.http_endpoint()
    }

    pub fn ws_endpoint(&self) -> Option<&str> {
        self.stack.ws_endpoint()
    }

    /// Starts services and RPC endpoints.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != LifecycleState::Starting {
            return Err(NodeError::resource(anyhow::anyhow!(
                "cannot start node in state {:?}",
                self.state
            )));
        }
        self.stack
            .start()
            .context("Error starting protocol stack")
            .map_err(NodeError::Resource)?;
        self.state = LifecycleState::Running;
        slog::info!(self.logger, "Node running");
        Ok(())
    }

    /// Blocks until a termination signal or a fatal report arrives.
    ///
    /// The termination receiver is dropped as soon as a signal is taken.
    pub fn wait(&mut self) -> StopReason {
        let Some(signals) = self.signals.take() else {
            return StopReason::SignalSourceClosed;
        };
        let mut fatal = self.fatal.clone();
        let reason = loop {
            let outcome = channel::select! {
                recv(signals) -> signal => Some(match signal {
                    Ok(signal) => StopReason::Signal(signal),
                    Err(_) => StopReason::SignalSourceClosed,
                }),
                recv(fatal) -> report => report.ok().map(StopReason::Fatal),
            };
            match outcome {
                Some(reason) => break reason,
                // The check finished cleanly.
                None => fatal = channel::never(),
            }
        };
        drop(signals);
        self.state = LifecycleState::ShuttingDown;
        reason
    }

    /// Ordered shutdown: cancel the check, drop the node, close the stack.
    pub fn shutdown(&mut self) -> Result<(), NodeError> {
        if self.state == LifecycleState::Terminated {
            return Ok(());
        }
        self.state = LifecycleState::ShuttingDown;
        self.signals = None;
        slog::info!(self.logger, "Shutting down");

        let mut result = Ok(());
        if let Some(check) = self.module_check.take() {
            if let Err(e) = check.join() {
                result = Err(NodeError::Resource(e));
            }
        }
        self.node = None;
        if let Err(e) = self.stack.close() {
            slog::error!(self.logger, "Error closing stack"; "error" => %e);
            if result.is_ok() {
                result = Err(NodeError::Resource(e.context("Error closing stack")));
            }
        }

        self.state = LifecycleState::Terminated;
        slog::info!(self.logger, "Node terminated");
        result
    }

    /// Runs the node until termination, starting it first unless already running.
    ///
    /// A fatal report still goes through the ordered shutdown before its error
    /// is returned.
    pub fn run(mut self) -> Result<(), NodeError> {
        if self.state != LifecycleState::Running {
            if let Err(e) = self.start() {
                let _ = self.shutdown();
                return Err(e);
            }
        }
        let reason = self.wait();
        slog::info!(self.logger, "Stopping node"; "reason" => ?reason);
        let closed = self.shutdown();
        match reason {
            StopReason::Fatal(err) => Err(err.into()),
            StopReason::Signal(_) | StopReason::SignalSourceClosed => closed,
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if self.state != LifecycleState::Terminated {
            let _ = self.shutdown();
        }
    }
}
