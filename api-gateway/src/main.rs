// api-gateway/src/main.rs

//! API gateway binary.
//!
//! This binary exposes a small read-only HTTP API on top of the
//! `nice_indexer` crate:
//!
//! - `GET /health`
//! - `GET /stats`
//! - `GET /nicehashes?limit=N`
//! - `GET /utxos/{txid}/{vout}`
//! - `GET /balances/{address}`
//!
//! It either owns the RocksDB ledger and embeds the ingestion loop, or
//! follows a ledger owned by a separate `nice-indexer` process through a
//! read-only secondary instance. A Prometheus exporter runs on `/metrics`.

mod config;
mod explorer;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::{Router, routing::get};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nice_indexer::{
    ChainSource, Ingestor, LedgerReader, MetricsRegistry, Network, ProtocolEngine, QueryService,
    RocksLedgerReader, RpcClient, ShardedRocksLedger, run_prometheus_http_server,
};

use explorer::ExplorerClient;
use routes::{balances, health, nicehashes, stats, utxos};
use state::{AppState, SharedState};

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version)]
#[command(about = "HTTP read API over the nice-indexer ledger")]
struct Cli {
    /// TOML configuration file shared with the indexer.
    #[arg(short, long, env = "NICE_INDEXER_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    network: Option<Network>,

    /// Overrides `gateway.listen_addr`.
    #[arg(long)]
    listen: Option<std::net::SocketAddr>,

    /// Serve a ledger owned by a running indexer instead of ingesting.
    #[arg(long)]
    no_ingest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api_gateway=info,nice_indexer=info")),
        )
        .init();

    run(Cli::parse()).await
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/stats", get(stats::stats))
        .route("/nicehashes", get(nicehashes::latest))
        .route("/utxos/{txid}/{vout}", get(utxos::balance))
        .route("/balances/{address}", get(balances::by_address))
        .with_state(state)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (mut chain_cfg, mut api_cfg) = config::load(cli.config.as_deref())?;
    if let Some(network) = cli.network {
        chain_cfg.network = network;
    }
    if let Some(addr) = cli.listen {
        api_cfg.listen_addr = addr;
    }
    if cli.no_ingest {
        api_cfg.ingest = false;
    }
    chain_cfg.validate()?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| anyhow!("failed to initialise metrics registry: {e}"))?,
    );

    if chain_cfg.metrics.enabled {
        let registry = metrics.clone();
        let addr = chain_cfg.metrics.listen_addr;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(registry, addr, token).await {
                error!(error = %e, "metrics HTTP server error");
            }
        });
    }

    // ---------------------------
    // Ledger + ingestion loop
    // ---------------------------

    let ledger_cfg = chain_cfg.ledger_config();
    let params = chain_cfg.protocol_params();

    let (reader, ingest_task) = if api_cfg.ingest {
        let ledger = ShardedRocksLedger::open(&ledger_cfg).with_context(|| {
            format!("failed to open ledger at {}", ledger_cfg.path.display())
        })?;
        let reader: Arc<dyn LedgerReader> = Arc::new(ledger.reader());

        let rpc = RpcClient::new(&chain_cfg.rpc_config()).context("failed to build RPC client")?;
        let source = ChainSource::new(
            chain_cfg.backend.source,
            rpc,
            params.unit,
            chain_cfg.backend.native_until_height,
        );
        let mut ingestor =
            Ingestor::new(ProtocolEngine::new(params), ledger, chain_cfg.ingest_config())
                .with_metrics(metrics.ingest.clone());
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = ingestor.run(source, token.clone()).await;
            // A fatal ingestion error takes the API down with it.
            token.cancel();
            result
        });
        (reader, Some(task))
    } else {
        info!("ingestion disabled; following the indexer's ledger read-only");
        let reader = RocksLedgerReader::open_secondary(&ledger_cfg).with_context(|| {
            format!("failed to open ledger reader at {}", ledger_cfg.path.display())
        })?;
        tokio::spawn(follow_primary(
            reader.clone(),
            api_cfg.reader_refresh(),
            shutdown.clone(),
        ));
        let reader: Arc<dyn LedgerReader> = Arc::new(reader);
        (reader, None)
    };

    // ---------------------------
    // Shared state + HTTP router
    // ---------------------------

    let explorer = ExplorerClient::new(&api_cfg.explorer_url, api_cfg.explorer_timeout())
        .context("failed to build explorer client")?;

    let app_state: SharedState = Arc::new(AppState {
        query: QueryService::new(reader),
        explorer,
        address: chain_cfg.address_params(),
        network: chain_cfg.network,
        min_zero_count: params.min_zero_count,
    });

    let app = router(app_state);

    // ---------------------------
    // axum 0.8 server
    // ---------------------------

    info!("API gateway listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", api_cfg.listen_addr))?;

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("API server error")?;

    shutdown.cancel();

    if let Some(task) = ingest_task {
        task.await
            .context("ingestion task panicked")?
            .context("ingestion failed")?;
    }
    Ok(())
}

/// Keeps a secondary reader in step with the process that owns the ledger.
async fn follow_primary(reader: RocksLedgerReader, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = reader.catch_up() {
                    warn!(error = %e, "ledger reader catch-up failed");
                }
            }
        }
    }
}

/// Cancels `shutdown` on Ctrl-C.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
