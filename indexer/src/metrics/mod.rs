//! Metrics and instrumentation for the indexer.
//!
//! This module defines Prometheus-compatible ingestion metrics and exposes
//! a small HTTP exporter that serves `/metrics` in Prometheus text format.
//!
//! Typical usage:
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use nice_indexer::metrics::{MetricsRegistry, run_prometheus_http_server};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let addr: SocketAddr = "127.0.0.1:9898".parse()?;
//! let shutdown = CancellationToken::new();
//!
//! tokio::spawn(run_prometheus_http_server(registry.clone(), addr, shutdown.clone()));
//!
//! // Hand `registry.ingest.clone()` to the ingestor.
//! ```

pub mod prometheus;

pub use prometheus::{IngestMetrics, MetricsRegistry, run_prometheus_http_server};
