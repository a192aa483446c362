//! Daemon configuration: an optional JSON file, then CLI flags on top.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use znode_protocol::config::NetworkMode;
use znode_protocol::network::{DEFAULT_RELAY_CACHE_SIZE, DEFAULT_SEEN_CACHE_SIZE};

use crate::cli::RunArgs;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub network: NetworkMode,
    pub api_port: u16,
    pub metrics_port: u16,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// "pretty" or "json".
    pub log_format: String,
    /// Bound on each seen-message cache of the znode list.
    pub seen_cache_size: usize,
    pub relay_cache_size: usize,
    /// Chain seed loaded into the in-memory chain at startup.
    pub chain_file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkMode::Mainnet,
            api_port: 8170,
            metrics_port: 9170,
            log_level: "znode_node=info,znode_protocol=info".to_string(),
            log_format: "pretty".to_string(),
            seen_cache_size: DEFAULT_SEEN_CACHE_SIZE,
            relay_cache_size: DEFAULT_RELAY_CACHE_SIZE,
            chain_file: None,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Resolves the effective configuration for `run`.
    pub fn resolve(args: &RunArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &RunArgs) {
        if let Some(network) = args.network {
            self.network = network;
        }
        if let Some(port) = args.api_port {
            self.api_port = port;
        }
        if let Some(port) = args.metrics_port {
            self.metrics_port = port;
        }
        if let Some(format) = &args.log_format {
            self.log_format = format.clone();
        }
        if let Some(path) = &args.chain_file {
            self.chain_file = Some(path.clone());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api_port == 0 || self.metrics_port == 0 {
            bail!("ports must be non-zero");
        }
        if self.api_port == self.metrics_port {
            bail!("api and metrics ports must differ (both {})", self.api_port);
        }
        if self.seen_cache_size == 0 || self.relay_cache_size == 0 {
            bail!("cache sizes must be non-zero");
        }
        Ok(())
    }
}
