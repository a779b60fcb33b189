//! L2 node binary.
//!
//! # Usage
//!
//! Start a local development sequencer:
//! ```bash
//! cargo run --package node -- --dev-init --l2-chain-id 412346
//! ```
//!
//! Run from a configuration file, importing a snapshot on first start:
//! ```bash
//! cargo run --package node -- --config node.toml --import-file snapshot.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use slog::{Drain, Logger, o};

use node::{Bootstrap, NodeConfig, NodeError};

#[derive(Parser, Debug)]
#[command(name = "l2-node")]
#[command(about = "Bootstrap and run an L2 rollup node")]
#[command(version)]
struct Args {
    /// Path to a TOML or YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Start from the single-account development genesis
    #[arg(long)]
    dev_init: bool,

    /// JSON initialization snapshot to import
    #[arg(long)]
    import_file: Option<PathBuf>,

    /// L2 chain id
    #[arg(long)]
    l2_chain_id: Option<u64>,

    /// Data directory of the node
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// HTTP-RPC listen address; empty disables the endpoint
    #[arg(long)]
    http_addr: Option<String>,

    #[arg(long)]
    http_port: Option<u16>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = e.print();
                return ExitCode::SUCCESS;
            }
            print_sample_usage();
            println!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            print_sample_usage();
            println!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let (logger, _guard) = create_logger(&config.log_level);
    slog::info!(logger, "Running L2 node");

    let manager = match Bootstrap::new(config, &logger).with_os_signals().run() {
        Ok(manager) => manager,
        Err(e) => {
            report_bring_up_failure(&logger, &e);
            return ExitCode::FAILURE;
        }
    };

    match manager.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            slog::crit!(logger, "Node stopped with error"; "error" => %e);
            ExitCode::FAILURE
        }
    }
}

/// Loads file (or defaults) plus environment, then applies CLI overrides.
fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => NodeConfig::from_env().context("Failed to load config from environment")?,
    };

    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.dev_init {
        config.dev_init = true;
    }
    if let Some(file) = &args.import_file {
        config.import_file = Some(file.clone());
    }
    if let Some(chain_id) = args.l2_chain_id {
        config.l2.chain_id = chain_id;
    }
    if let Some(dir) = &args.data_dir {
        config.persistent.chain = dir.clone();
    }
    if let Some(addr) = &args.http_addr {
        config.http.addr = addr.clone();
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    Ok(config)
}

fn report_bring_up_failure(logger: &Logger, err: &NodeError) {
    if err.is_usage_error() {
        slog::error!(logger, "Invalid configuration"; "error" => %err);
    } else {
        slog::crit!(logger, "Bring-up failed"; "error" => %err);
    }
    print_sample_usage();
    println!("{err}");
}

fn print_sample_usage() {
    let progname = std::env::args().next().unwrap_or_else(|| "l2-node".to_string());
    println!();
    println!("Sample usage:                  {progname} --help");
}

fn create_logger(level: &str) -> (Logger, slog_async::AsyncGuard) {
    use slog::Level;
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (
        Logger::root(drain.fuse(), o!("version" => env!("CARGO_PKG_VERSION"))),
        guard,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::try_parse_from([
            "l2-node",
            "--dev-init",
            "--l2-chain-id",
            "412345",
            "--http-addr",
            "127.0.0.1",
            "--http-port",
            "0",
        ])
        .unwrap();
        figment::Jail::expect_with(|_| {
            let config = load_config(&args).unwrap();
            assert!(config.dev_init);
            assert_eq!(config.l2.chain_id, 412345);
            assert_eq!(config.http.addr, "127.0.0.1");
            assert_eq!(config.http.port, 0);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let err = Args::try_parse_from(["l2-node", "--no-such-flag"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_help_is_not_a_failure() {
        let err = Args::try_parse_from(["l2-node", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
