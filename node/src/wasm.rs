//! Validation-machine module root resolution and the background compatibility check.
//!
//! The expected module root comes from configuration or from the `module_root`
//! file next to the machine. When the validator runs with block validation, a
//! [`ModuleRootCheck`] loads the machine on its own thread, hashes it and
//! reports a mismatch to the lifecycle owner as a fatal [`ConsistencyError`].

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use alloy_primitives::{B256, Keccak256, hex};
use anyhow::{Context, Result};
use crossbeam::channel::Sender;
use slog::Logger;

use crate::config::{ValidatorConfig, WasmConfig};
use crate::error::{ConsistencyError, NodeError};

/// Name of the sidecar file holding the expected module root.
pub const MODULE_ROOT_FILE: &str = "module_root";

/// Machine binary hashed when no cached image is configured.
pub const REPLAY_BINARY: &str = "replay.wasm";

const MODULE_ROOT_HEX_LEN: usize = 64;
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Resolved machine location and expected module root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmRoot {
    pub root_path: PathBuf,
    pub module_root: B256,
}

/// Explicit machine-loading configuration handed to a [`MachineLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub root_path: PathBuf,
    pub initial_machine_cache_path: Option<PathBuf>,
}

impl MachineConfig {
    pub fn new(root: &WasmRoot, wasm: &WasmConfig) -> Self {
        Self {
            root_path: root.root_path.clone(),
            initial_machine_cache_path: wasm.cache_path.clone(),
        }
    }
}

/// Loads the validation machine and computes its module root.
pub trait MachineLoader: Send + Sync {
    /// Returns the root of the machine, or an error. Implementations should
    /// give up early once `cancel` is set.
    fn initial_module_root(&self, config: &MachineConfig, cancel: &AtomicBool) -> Result<B256>;
}

/// Hashes the machine image on disk.
///
/// The cached image is used when configured, otherwise `<root>/replay.wasm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMachineLoader;

impl MachineLoader for FileMachineLoader {
    fn initial_module_root(&self, config: &MachineConfig, cancel: &AtomicBool) -> Result<B256> {
        let path = match &config.initial_machine_cache_path {
            Some(cache) => cache.clone(),
            None => config.root_path.join(REPLAY_BINARY),
        };
        let file = File::open(&path)
            .with_context(|| format!("Failed to open machine image {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Keccak256::new();
        let mut buf = vec![0u8; HASH_CHUNK_SIZE];
        loop {
            anyhow::ensure!(!cancel.load(Ordering::Acquire), "machine load cancelled");
            let read = reader
                .read(&mut buf)
                .with_context(|| format!("Failed to read machine image {}", path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hasher.finalize())
    }
}

/// `<dir(dir(current_exe))>/machine`.
pub fn default_root_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let install_dir = exe
        .parent()
        .and_then(Path::parent)
        .context("Executable has no install directory")?;
    Ok(install_dir.join("machine"))
}

/// Sidecar file contents as a module root: trimmed, then cut to 64 characters.
///
/// The cut counts a `0x` prefix, so a prefixed 32-byte root loses its last
/// byte and is read left-padded.
pub fn sidecar_module_root(contents: &str) -> &str {
    let trimmed = contents.trim();
    match trimmed.char_indices().nth(MODULE_ROOT_HEX_LEN) {
        Some((end, _)) => &trimmed[..end],
        None => trimmed,
    }
}

/// Decodes a module root with an optional `0x` prefix.
///
/// Short values are left-padded with zeros; longer ones keep their last 64
/// digits.
pub fn parse_module_root(raw: &str) -> Result<B256, ConsistencyError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let invalid = || ConsistencyError::InvalidModuleRoot(raw.to_string());
    if !digits.is_ascii() {
        return Err(invalid());
    }
    let digits = &digits[digits.len().saturating_sub(MODULE_ROOT_HEX_LEN)..];
    let padded = format!("{digits:0>width$}", width = MODULE_ROOT_HEX_LEN);
    let bytes = hex::decode(&padded).map_err(|_| invalid())?;
    Ok(B256::from_slice(&bytes))
}

/// Determines the machine location and the expected module root.
///
/// A missing sidecar file only matters when the validator needs the machine;
/// otherwise the root resolves to zero.
pub fn resolve(wasm: &WasmConfig, validator: &ValidatorConfig) -> Result<WasmRoot, NodeError> {
    let root_path = match &wasm.root_path {
        Some(path) => path.clone(),
        None => default_root_path().map_err(NodeError::Resource)?,
    };

    let raw = match wasm.module_root.as_deref().filter(|root| !root.is_empty()) {
        Some(configured) => configured.to_string(),
        None => {
            let sidecar = root_path.join(MODULE_ROOT_FILE);
            match fs::read_to_string(&sidecar) {
                Ok(contents) => sidecar_module_root(&contents).to_string(),
                Err(e) if validator.requires_machine() => {
                    return Err(NodeError::Resource(anyhow::Error::new(e).context(format!(
                        "Failed reading wasm module root from {}",
                        sidecar.display()
                    ))));
                }
                Err(_) => String::new(),
            }
        }
    };

    Ok(WasmRoot {
        root_path,
        module_root: parse_module_root(&raw)?,
    })
}

/// Background module-root compatibility check.
///
/// Owned by the lifecycle manager: cancelled and joined during shutdown.
pub struct ModuleRootCheck {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ModuleRootCheck {
    /// Spawns the check. A mismatch or load failure is sent on `fatal`.
    pub fn spawn(
        loader: Arc<dyn MachineLoader>,
        config: MachineConfig,
        expected: B256,
        fatal: Sender<ConsistencyError>,
        logger: Logger,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        let handle = std::thread::Builder::new()
            .name("module-root-check".into())
            .spawn(move || {
                let outcome = loader.initial_module_root(&config, &thread_cancel);
                if thread_cancel.load(Ordering::Acquire) {
                    slog::debug!(logger, "Module root check cancelled");
                    return;
                }
                let failure = match outcome {
                    Ok(found) if found == expected => {
                        slog::info!(logger, "Loaded wasm machine"; "module_root" => %found);
                        return;
                    }
                    Ok(found) => ConsistencyError::ModuleRootMismatch { expected, found },
                    Err(e) => ConsistencyError::MachineLoad(format!("{e:#}")),
                };
                slog::error!(logger, "Module root check failed"; "error" => %failure);
                // Nobody listening means the node is already shutting down.
                let _ = fatal.try_send(failure);
            })
            .context("Failed to spawn module root check thread")?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Asks the check to stop at its next opportunity.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Cancels the check and waits for its thread.
    pub fn join(mut self) -> Result<()> {
        self.cancel();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("module root check thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for ModuleRootCheck {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Starts the check when the validator runs with block validation.
pub fn start_module_root_check(
    root: &WasmRoot,
    wasm: &WasmConfig,
    validator: &ValidatorConfig,
    loader: Arc<dyn MachineLoader>,
    fatal: Sender<ConsistencyError>,
    logger: &Logger,
) -> Result<Option<ModuleRootCheck>, NodeError> {
    if !validator.requires_machine() {
        return Ok(None);
    }
    let check = ModuleRootCheck::spawn(
        loader,
        MachineConfig::new(root, wasm),
        root.module_root,
        fatal,
        logger.new(slog::o!("component" => "module-root-check")),
    )
    .map_err(NodeError::Resource)?;
    Ok(Some(check))
}
