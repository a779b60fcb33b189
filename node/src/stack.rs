//! Node stack: the data directory, the chain database, registered services
//! and the RPC endpoints, all driven by one tokio runtime.
//!
//! ## Start Order
//!
//! ```text
//! 1. Services   ─── in registration order
//!        ↓
//! 2. HTTP RPC
//!        ↓
//! 3. WS RPC
//! ```
//!
//! ## Close Order
//!
//! ```text
//! 1. Stop RPC servers ─── no new requests
//! 2. Stop services    ─── reverse registration order
//! 3. Stop runtime     ─── drops remaining connection tasks
//! 4. Close database   ─── every other handle is gone by now
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chain::ChainStore;
use rpc::{HttpConfig, RpcApi, RpcServerHandle, WsConfig};
use slog::{Logger, o};
use tokio::runtime::{Handle, Runtime};

/// Database file inside each named database directory.
const DATABASE_FILE: &str = "chain.redb";

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-running component started and stopped by the stack.
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Starts the service on the stack's runtime.
    fn start(&mut self, runtime: &Handle) -> Result<()>;

    /// Stops the service and waits for it to finish.
    fn stop(&mut self, runtime: &Handle) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct StackConfig {
    pub data_dir: PathBuf,
    pub chain_id: u64,
    pub http: HttpConfig,
    pub ws: WsConfig,
    pub client_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackState {
    Initializing,
    Running,
    Closed,
}

pub struct NodeStack {
    config: StackConfig,
    runtime: Option<Runtime>,
    store: Option<ChainStore>,
    services: Vec<Box<dyn Service>>,
    started: usize,
    accounts: Vec<Address>,
    http: Option<RpcServerHandle>,
    ws: Option<RpcServerHandle>,
    http_endpoint: Option<String>,
    ws_endpoint: Option<String>,
    state: StackState,
    logger: Logger,
}

impl NodeStack {
    /// Creates the stack and its data directory.
    pub fn new(config: StackConfig, runtime: Runtime, logger: &Logger) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;
        Ok(Self {
            config,
            runtime: Some(runtime),
            store: None,
            services: Vec::new(),
            started: 0,
            accounts: Vec::new(),
            http: None,
            ws: None,
            http_endpoint: None,
            ws_endpoint: None,
            state: StackState::Initializing,
            logger: logger.new(o!("component" => "stack")),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn runtime(&self) -> Result<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .context("node stack is closed")
    }

    /// Opens the named database. Each stack opens its database once.
    pub fn open_database(&mut self, name: &str) -> Result<ChainStore> {
        anyhow::ensure!(
            self.state == StackState::Initializing,
            "cannot open database on a started or closed stack"
        );
        anyhow::ensure!(self.store.is_none(), "database already opened");

        let dir = self.config.data_dir.join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
        let store = ChainStore::open(dir.join(DATABASE_FILE))
            .with_context(|| format!("Failed to open database {name}"))?;
        slog::info!(self.logger, "Opened database"; "name" => name, "path" => %store.path().display());

        self.store = Some(store.clone());
        Ok(store)
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) -> Result<()> {
        anyhow::ensure!(
            self.state == StackState::Initializing,
            "cannot register service {} on a started or closed stack",
            service.name()
        );
        slog::debug!(self.logger, "Registered service"; "service" => service.name());
        self.services.push(service);
        Ok(())
    }

    /// Adds an account listed by `personal_listAccounts`.
    pub fn add_account(&mut self, address: Address) {
        if !self.accounts.contains(&address) {
            self.accounts.push(address);
        }
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    /// Starts services, then the RPC endpoints.
    ///
    /// On failure whatever was started keeps running until [`close`](Self::close).
    pub fn start(&mut self) -> Result<()> {
        anyhow::ensure!(self.state == StackState::Initializing, "node stack already started");
        let store = self.store.clone().context("database must be opened before start")?;
        let runtime = self
            .runtime
            .as_ref()
            .context("node stack is closed")?
            .handle()
            .clone();

        for service in &mut self.services {
            service
                .start(&runtime)
                .with_context(|| format!("Failed to start service {}", service.name()))?;
            self.started += 1;
            slog::info!(self.logger, "Started service"; "service" => service.name());
        }

        let api = RpcApi::new(
            store,
            self.config.chain_id,
            self.accounts.clone(),
            self.config.client_version.clone(),
            self.logger.new(o!("component" => "rpc")),
        );
        if self.config.http.enabled() {
            let handle = runtime.block_on(rpc::start_http(
                &self.config.http,
                &api,
                self.logger.new(o!("component" => "http")),
            ))?;
            self.http_endpoint = Some(handle.endpoint());
            self.http = Some(handle);
        }
        if self.config.ws.enabled() {
            let handle = runtime.block_on(rpc::start_ws(
                &self.config.ws,
                &api,
                self.logger.new(o!("component" => "ws")),
            ))?;
            self.ws_endpoint = Some(handle.endpoint());
            self.ws = Some(handle);
        }

        self.state = StackState::Running;
        slog::info!(
            self.logger,
            "Node stack started";
            "services" => self.services.len(),
            "http" => self.http_endpoint.as_deref().unwrap_or("disabled"),
            "ws" => self.ws_endpoint.as_deref().unwrap_or("disabled"),
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state == StackState::Running
    }

    pub fn http_endpoint(&self) -> Option<&str> {
        self.http_endpoint.as_deref()
    }

    pub fn ws_endpoint(&self) -> Option<&str> {
        self.ws_endpoint.as_deref()
    }

    /// Releases everything in reverse acquisition order.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == StackState::Closed {
            return Ok(());
        }
        self.state = StackState::Closed;
        slog::info!(self.logger, "Closing node stack");

        let mut first_error: Option<anyhow::Error> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        if let Some(runtime) = self.runtime.as_ref() {
            for server in [self.ws.take(), self.http.take()].into_iter().flatten() {
                record(runtime.block_on(server.stop()));
            }

            let handle = runtime.handle().clone();
            let started = std::mem::take(&mut self.started);
            for service in self.services[..started].iter_mut().rev() {
                let name = service.name();
                record(
                    service
                        .stop(&handle)
                        .with_context(|| format!("Failed to stop service {name}")),
                );
                slog::debug!(self.logger, "Stopped service"; "service" => name);
            }
        }
        self.services.clear();

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        }

        if let Some(store) = self.store.take() {
            record(store.close());
        }

        match first_error {
            Some(e) => {
                slog::error!(self.logger, "Node stack closed with errors"; "error" => %e);
                Err(e)
            }
            None => {
                slog::info!(self.logger, "Node stack closed");
                Ok(())
            }
        }
    }
}

impl Drop for NodeStack {
    fn drop(&mut self) {
        if self.state != StackState::Closed {
            let _ = self.close();
        }
    }
}
