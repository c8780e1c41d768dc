//! Ingestion metrics and their `/metrics` exporter.
//!
//! [`IngestMetrics`] counts applied and rolled-back blocks, fetch errors and
//! minted rewards; [`run_prometheus_http_server`] serves the text exposition
//! format over a plain `hyper` HTTP/1 listener.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode, body::Incoming, header, header::HeaderValue,
    server::conn::http1, service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

/// Ingestion metrics.
///
/// Cloning is cheap; every clone updates the same underlying series.
#[derive(Clone)]
pub struct IngestMetrics {
    /// Blocks applied to the ledger.
    pub blocks_applied: IntCounter,
    /// Blocks reverted by reorg handling.
    pub blocks_rolled_back: IntCounter,
    /// Time to apply one block to the ledger, in seconds.
    pub block_apply_seconds: Histogram,
    /// Failed tip queries and block fetches.
    pub fetch_errors: IntCounter,
    /// Blocks waiting in the fetch buffer.
    pub buffered_blocks: IntGauge,
    pub last_indexed_height: IntGauge,
    /// Atomic units minted as rewards.
    pub rewards_minted: IntCounter,
}

impl IngestMetrics {
    /// Registers ingestion metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let blocks_applied = IntCounter::with_opts(Opts::new(
            "ingest_blocks_applied_total",
            "Total number of blocks applied to the ledger",
        ))?;
        registry.register(Box::new(blocks_applied.clone()))?;

        let blocks_rolled_back = IntCounter::with_opts(Opts::new(
            "ingest_blocks_rolled_back_total",
            "Total number of blocks rolled back during reorgs",
        ))?;
        registry.register(Box::new(blocks_rolled_back.clone()))?;

        let block_apply_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ingest_block_apply_seconds",
                "Time to apply a block to the ledger in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(block_apply_seconds.clone()))?;

        let fetch_errors = IntCounter::with_opts(Opts::new(
            "ingest_fetch_errors_total",
            "Total number of failed tip queries and block fetches",
        ))?;
        registry.register(Box::new(fetch_errors.clone()))?;

        let buffered_blocks = IntGauge::with_opts(Opts::new(
            "ingest_buffered_blocks",
            "Blocks fetched ahead and waiting to be applied",
        ))?;
        registry.register(Box::new(buffered_blocks.clone()))?;

        let last_indexed_height = IntGauge::with_opts(Opts::new(
            "ingest_last_indexed_height",
            "Height of the last block committed to the ledger",
        ))?;
        registry.register(Box::new(last_indexed_height.clone()))?;

        let rewards_minted = IntCounter::with_opts(Opts::new(
            "ingest_rewards_minted_total",
            "Total reward minted to nice transactions, in atomic units",
        ))?;
        registry.register(Box::new(rewards_minted.clone()))?;

        Ok(Self {
            blocks_applied,
            blocks_rolled_back,
            block_apply_seconds,
            fetch_errors,
            buffered_blocks,
            last_indexed_height,
            rewards_minted,
        })
    }
}

/// Wrapper around a Prometheus registry and the ingestion metrics.
///
/// This is the main handle passed around in the indexer. It can be
/// wrapped in an [`Arc`] and shared across tasks.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub ingest: IngestMetrics,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let ingest = IngestMetrics::register(&registry)?;
        Ok(Self { registry, ingest })
    }

    /// Text exposition of every registered metric.
    pub fn gather_text(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&families, &mut buffer) {
            warn!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Serves `GET /metrics` on `addr` until `shutdown` is cancelled.
///
/// All other paths return 404.
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics exporter listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                debug!(%peer, error = %err, "metrics connection error");
            }
        });
    }

    info!("metrics exporter stopped");
    Ok(())
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut response = text_response(StatusCode::OK, metrics.gather_text());
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "not found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = IngestMetrics::register(&registry).expect("register metrics");

        metrics.blocks_applied.inc();
        metrics.block_apply_seconds.observe(0.004);
        metrics.buffered_blocks.set(3);
        metrics.rewards_minted.inc_by(100_000_000);

        assert_eq!(metrics.blocks_applied.get(), 1);
        assert!(!registry.gather().is_empty());
    }

    #[test]
    fn registering_twice_fails() {
        let registry = Registry::new();
        IngestMetrics::register(&registry).expect("first registration");
        assert!(IngestMetrics::register(&registry).is_err());
    }

    #[test]
    fn gather_text_uses_plain_metric_names() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        registry.ingest.last_indexed_height.set(69_001);

        let text = registry.gather_text();
        assert!(text.contains("ingest_last_indexed_height 69001"));
        assert!(text.contains("ingest_blocks_applied_total"));
    }
}
