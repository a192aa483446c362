//! # CLI Interface
//!
//! Command-line arguments for `znode-node`, via `clap` derive. Four
//! subcommands: `run`, `timings`, `genkey` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use znode_protocol::config::NetworkMode;

/// Znode list daemon.
///
/// Keeps the local view of the znode list: accepts announcements and pings,
/// re-checks every record on a fixed cadence, and exposes the result over
/// HTTP and as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "znode-node",
    about = "Znode list daemon",
    version,
    propagate_version = true
)]
pub struct ZnodeNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon.
    Run(RunArgs),
    /// Print the timing rules of a network and exit.
    Timings(TimingsArgs),
    /// Generate a fresh znode operating key.
    Genkey,
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand. Flags override the config file.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Path to a JSON config file.
    #[arg(long, short = 'c', env = "ZNODE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network to attach to: mainnet, testnet or regtest.
    #[arg(long, short = 'n', env = "ZNODE_NETWORK")]
    pub network: Option<NetworkMode>,

    /// Port for the HTTP API.
    #[arg(long, env = "ZNODE_API_PORT")]
    pub api_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ZNODE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format: pretty or json.
    #[arg(long, env = "ZNODE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// JSON chain seed (blocks and collateral outputs) loaded at startup.
    #[arg(long, env = "ZNODE_CHAIN_FILE")]
    pub chain_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct TimingsArgs {
    #[arg(long, short = 'n', env = "ZNODE_NETWORK", default_value = "mainnet")]
    pub network: NetworkMode,
}
