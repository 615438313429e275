//! Veilbridge Relayer
//!
//! Single-instance relayer node: watches configured source chains for
//! deposit commitments, finalizes them per chain confirmation policy and
//! relays them to their destination chains exactly once. Shielded transfers
//! are gated behind zero-knowledge proof verification.
//!
//! Registry state is persisted to disk and survives restarts; in-flight
//! relays resume instead of being dropped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ed25519_dalek::SigningKey;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod status;

use bridge_registry::CommitmentRegistry;
use chain_adapter::{ChainAdapter, InMemoryChain};
use config::{ChainKind, RelayerConfig};
use relay_engine::{DigestProofSystem, RelayEngine};

/// Cross-chain relay protocol engine
#[derive(Parser, Debug)]
#[command(name = "veilbridge")]
#[command(about = "Commitment-based cross-chain relayer with shielded transfers", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "relayer.toml")]
    config: PathBuf,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting veilbridge relayer v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayerConfig::load(&args.config).context("failed to load configuration")?;
    tracing::info!("  chains: {}", config.chains.len());
    tracing::info!("  data directory: {}", config.data_dir);
    tracing::info!("  status endpoint: {}", config.status_addr);

    std::fs::create_dir_all(&config.data_dir)?;
    let registry = CommitmentRegistry::open(&config.data_dir)
        .map_err(|e| anyhow::anyhow!("failed to open registry: {e}"))?;
    tracing::info!("  registry records: {}", registry.len());

    let signer = SigningKey::from_bytes(&config.signing_key_seed()?);

    let mut builder = RelayEngine::builder(config.engine_config())
        .registry(registry.clone())
        .proof_system(Box::new(DigestProofSystem))
        .signer(signer);
    for chain in &config.chains {
        builder = builder.adapter(build_adapter(chain)?);
        tracing::info!("  chain {} ({}) ready", chain.name, chain.chain_id);
    }
    let engine = Arc::new(builder.build()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine_handle = tokio::spawn(engine.clone().run(shutdown_rx));

    let status_engine = engine.clone();
    let status_addr = config.status_addr.clone();
    let status_handle = tokio::spawn(async move {
        if let Err(e) = status::serve(status_engine, &status_addr).await {
            tracing::error!("status endpoint error: {e}");
        }
    });

    tracing::info!("relayer running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    shutdown_tx.send(true).ok();
    engine_handle.await??;
    status_handle.abort();

    registry
        .flush()
        .map_err(|e| anyhow::anyhow!("final flush failed: {e}"))?;
    tracing::info!("relayer stopped");
    Ok(())
}

/// Construct the adapter for one configured chain.
///
/// Production adapters for EVM/NEAR/Solana wrap their RPC clients and are
/// wired by the deployment; in-tree the simulated chain backs local runs.
fn build_adapter(chain: &config::ChainConfig) -> Result<Arc<dyn ChainAdapter>> {
    match chain.kind {
        ChainKind::Memory => Ok(Arc::new(InMemoryChain::new(
            bridge_core::ChainId(chain.chain_id),
            chain.name.clone(),
        ))),
        kind => anyhow::bail!(
            "chain {} has kind {kind:?}, which requires an out-of-tree RPC adapter; \
             use kind = \"memory\" for local runs",
            chain.name
        ),
    }
}
