// src/main.rs
//
// Indexer node:
//
// - TOML configuration layered over network presets, CLI overrides
// - RocksDB-backed sharded ledger
// - Block source over the node's JSON-RPC (native / raw / hybrid)
// - Prometheus metrics exporter on /metrics
// - Ingestion loop until Ctrl-C / SIGTERM

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nice_indexer::{
    ChainSource, Height, IndexerConfig, Ingestor, LedgerReader, LedgerStore, MetricsRegistry,
    Network, ProtocolEngine, RocksLedgerReader, RpcClient, ShardedRocksLedger, SourceKind,
    run_prometheus_http_server,
};

#[derive(Parser, Debug)]
#[command(name = "nice-indexer", version)]
#[command(about = "Index nice transactions into a sharded balance ledger")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "NICE_INDEXER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, env = "NICE_INDEXER_NETWORK")]
    network: Option<Network>,

    /// Ledger directory, overrides `storage.path`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Node RPC endpoint, overrides `backend.url`.
    #[arg(long, env = "NICE_INDEXER_RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Disable the Prometheus exporter.
    #[arg(long)]
    no_metrics: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the chain and index blocks (default).
    Run,
    /// Print ledger stats and the resume cursor as JSON.
    Stats,
    /// Roll the ledger back to `height` (within the reorg window).
    Rollback { height: Height },
    /// Print the effective configuration as TOML.
    Config,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<IndexerConfig> {
        let mut config = match &self.config {
            Some(path) => IndexerConfig::load(path)?,
            None => IndexerConfig::default(),
        };

        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(dir) = &self.data_dir {
            config.storage.path = dir.clone();
        }
        if let Some(url) = &self.rpc_url {
            config.backend.url = url.clone();
        }
        if let Some(source) = self.source {
            config.backend.source = source;
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_node(&config).await,
        Command::Stats => print_stats(&config),
        Command::Rollback { height } => rollback_to(&config, height),
        Command::Config => {
            let text = toml::to_string_pretty(&config).context("failed to render config")?;
            println!("{text}");
            Ok(())
        }
    }
}

async fn run_node(config: &IndexerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| anyhow!("failed to initialise metrics registry: {e}"))?,
    );

    if config.metrics.enabled {
        let registry = metrics.clone();
        let addr = config.metrics.listen_addr;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(registry, addr, token).await {
                error!(error = %e, "metrics HTTP server error");
            }
        });
    }

    // ---------------------------
    // Ledger (RocksDB) + source
    // ---------------------------

    let ledger_config = config.ledger_config();
    let ledger = ShardedRocksLedger::open(&ledger_config).with_context(|| {
        format!("failed to open ledger at {}", ledger_config.path.display())
    })?;

    let params = config.protocol_params();
    let rpc = RpcClient::new(&config.rpc_config()).context("failed to build RPC client")?;
    let source = ChainSource::new(
        config.backend.source,
        rpc,
        params.unit,
        config.backend.native_until_height,
    );

    info!(
        network = %config.network,
        source = ?config.backend.source,
        shards = ledger_config.shard_count,
        min_zero_count = params.min_zero_count,
        "starting indexer"
    );

    // ---------------------------
    // Ingestion loop
    // ---------------------------

    let mut ingestor = Ingestor::new(ProtocolEngine::new(params), ledger, config.ingest_config())
        .with_metrics(metrics.ingest.clone());

    let result = ingestor.run(source, shutdown.clone()).await;
    shutdown.cancel();

    let summary = result.context("ingestion failed")?;
    info!(
        applied = summary.applied,
        rolled_back = summary.rolled_back,
        cursor = ?summary.cursor,
        "indexer stopped"
    );
    Ok(())
}

/// Reads through a secondary instance, so it works while `run` owns the ledger.
fn print_stats(config: &IndexerConfig) -> anyhow::Result<()> {
    let reader = RocksLedgerReader::open_secondary(&config.ledger_config())
        .context("failed to open ledger reader")?;
    let stats = reader.stats()?;
    let report = serde_json::json!({
        "network": config.network.to_string(),
        "last_indexed_block": reader.last_indexed_block()?,
        "max_height": reader.max_height()?,
        "conserved": stats.is_conserved(),
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn rollback_to(config: &IndexerConfig, height: Height) -> anyhow::Result<()> {
    let mut ledger = ShardedRocksLedger::open(&config.ledger_config())?;
    let Some(mut cursor) = ledger.last_indexed_block()? else {
        bail!("ledger is empty");
    };
    if height > cursor {
        bail!("cursor is {cursor}, nothing to roll back to {height}");
    }

    while cursor > height {
        ledger.rollback_block(cursor)?;
        info!(height = cursor, "rolled back");
        match ledger.last_indexed_block()? {
            Some(next) => cursor = next,
            None => break,
        }
    }
    let cursor = ledger.last_indexed_block()?;
    ledger.close()?;
    println!("cursor is now {cursor:?}");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C or, on Unix, SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                    _ = shutdown.cancelled() => return,
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = shutdown.cancelled() => return,
        }
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
