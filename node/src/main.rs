// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Znode Daemon
//!
//! Entry point for the `znode-node` binary. Parses CLI arguments, loads the
//! configuration, initializes logging and metrics, then keeps the znode
//! list current and serves it over HTTP. Chain state comes from an optional
//! seed file and the API's `/chain/*` routes.
//!
//! - `run`     : start the daemon
//! - `timings` : print a network's timing rules
//! - `genkey`  : generate a znode operating key
//! - `version` : print build version information

mod api;
mod chain;
mod cli;
mod config;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use znode_protocol::chain::{ChainHandle, ChainStateOracle, MemoryChain};
use znode_protocol::clock::{Clock, SystemClock};
use znode_protocol::config::{
    NetworkParams, TimingPolicy, PROTOCOL_VERSION, ZNODE_CHECK_SECONDS, ZNODE_EXPIRATION_SECONDS,
    ZNODE_MIN_MNB_SECONDS, ZNODE_WATCHDOG_MAX_SECONDS,
};
use znode_protocol::crypto::ZnodeKeypair;
use znode_protocol::network::{RelayQueue, ZnodeList, ZnodeSync};
use znode_protocol::znode::ZnodeEnv;

use chain::ChainSeed;
use cli::{Commands, ZnodeNodeCli};
use config::NodeConfig;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ZnodeNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Timings(args) => {
            print_timings(&NetworkParams::for_mode(args.network));
            Ok(())
        }
        Commands::Genkey => {
            generate_key();
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config = NodeConfig::resolve(&args)?;
    logging::init_logging(&config.log_level, LogFormat::from_str_lossy(&config.log_format));

    let params = NetworkParams::for_mode(config.network);
    tracing::info!(
        network = %params.mode,
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        "starting znode-node"
    );

    // --- Core ---
    let chain = match &config.chain_file {
        Some(path) => {
            let chain = ChainSeed::load(path)?.build()?;
            tracing::info!(
                path = %path.display(),
                height = ?chain.current_height(),
                "chain seed loaded"
            );
            chain
        }
        None => {
            tracing::warn!("no chain seed; feed blocks through /chain/blocks");
            MemoryChain::new()
        }
    };
    let clock = Arc::new(SystemClock::new());
    let sync = Arc::new(ZnodeSync::new());
    let relay = Arc::new(RelayQueue::new(config.relay_cache_size));
    let env = ZnodeEnv::new(
        ChainHandle::new(chain),
        params,
        clock.clone(),
        sync.clone(),
        relay.clone(),
    );
    let list = Arc::new(ZnodeList::new(config.seen_cache_size));

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to register prometheus metrics")?);

    let app_state = api::AppState {
        list: Arc::clone(&list),
        env: env.clone(),
        relay: Arc::clone(&relay),
        metrics: Arc::clone(&node_metrics),
        network: config.network,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Maintenance loop ---
    let round = MaintenanceRound {
        env,
        clock,
        sync,
        relay,
        list,
        metrics: node_metrics,
    };
    let maintenance = tokio::spawn(async move {
        let round = Arc::new(round);
        let mut interval =
            tokio::time::interval(Duration::from_secs(ZNODE_CHECK_SECONDS.unsigned_abs()));
        loop {
            interval.tick().await;
            let round = Arc::clone(&round);
            if let Err(e) = tokio::task::spawn_blocking(move || round.run()).await {
                tracing::error!(error = %e, "maintenance round failed");
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    maintenance.abort();
    tracing::info!("znode-node stopped");
    Ok(())
}

/// One pass of upkeep: sync status, record checks, relay and gauges.
struct MaintenanceRound {
    env: ZnodeEnv<MemoryChain>,
    clock: Arc<SystemClock>,
    sync: Arc<ZnodeSync>,
    relay: Arc<RelayQueue>,
    list: Arc<ZnodeList>,
    metrics: Arc<NodeMetrics>,
}

impl MaintenanceRound {
    fn run(&self) {
        chain::refresh_sync(&self.env.chain.view(), &self.sync, self.clock.now());
        self.list.check_all(&self.env, None);

        // No P2P transport yet: accepted messages are drained and counted.
        let relayed = self.relay.drain();
        if !relayed.is_empty() {
            tracing::debug!(count = relayed.len(), "relay queue drained");
            self.metrics.relayed_total.inc_by(relayed.len() as u64);
        }

        self.metrics.observe(&self.list);
        self.metrics.relay_pending.set(self.relay.pending_len() as i64);
        self.metrics.check_rounds_total.inc();
        tracing::trace!(
            znodes = self.list.len(),
            enabled = self.list.count_enabled(),
            "check round done"
        );
    }
}

fn print_timings(params: &NetworkParams) {
    let TimingPolicy {
        min_ping_interval_secs,
        new_start_required_secs,
    } = params.timing;

    println!("network                  {}", params.mode);
    println!("default port             {}", params.default_port);
    println!("collateral confirmations {}", params.min_collateral_confirmations);
    println!("min ping interval        {}s", min_ping_interval_secs);
    println!("min re-announce interval {}s", ZNODE_MIN_MNB_SECONDS);
    println!("expiration               {}s", ZNODE_EXPIRATION_SECONDS);
    println!("watchdog window          {}s", ZNODE_WATCHDOG_MAX_SECONDS);
    println!("new start required after {}s", new_start_required_secs);
}

fn generate_key() {
    let keypair = ZnodeKeypair::generate();
    let public_key = keypair.public_key();
    println!("secret key : {}", hex::encode(keypair.secret_key_bytes()));
    println!("public key : {}", public_key.to_hex());
    println!("key id     : {}", public_key.key_id());
}

fn print_version() {
    println!("znode-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
