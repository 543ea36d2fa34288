use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub chain_name: String,

    // Ledger metrics
    pub blocks_processed: Counter<u64>,
    pub transactions_written: Counter<u64>,
    pub skipped_blocks: Counter<u64>,
    pub partial_failures: Counter<u64>,
    pub checkpoint_block: Gauge<u64>,

    // Chain metrics
    pub chain_tip_block: Gauge<u64>,
    pub chain_tip_lag: Gauge<u64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new(chain_name: String) -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("avalytics_indexer");

        let blocks_processed = meter
            .u64_counter("avalytics_blocks_processed")
            .with_description("Total number of blocks written to the ledger")
            .build();

        let transactions_written = meter
            .u64_counter("avalytics_transactions_written")
            .with_description("Total number of transactions written to the ledger")
            .build();

        let skipped_blocks = meter
            .u64_counter("avalytics_skipped_blocks")
            .with_description("Blocks recorded as skipped because their payload was malformed")
            .build();

        let partial_failures = meter
            .u64_counter("avalytics_partial_batch_failures")
            .with_description("Batches that stopped at an unfetchable block")
            .build();

        let checkpoint_block = meter
            .u64_gauge("avalytics_checkpoint_block_number")
            .with_description("Highest contiguous block durably written")
            .build();

        let chain_tip_block = meter
            .u64_gauge("avalytics_chain_tip_block_number")
            .with_description("Head block number reported by the RPC endpoint")
            .build();

        let chain_tip_lag = meter
            .u64_gauge("avalytics_chain_tip_lag")
            .with_description("Blocks between the checkpoint and the chain head")
            .build();

        let rpc_requests = meter
            .u64_counter("avalytics_rpc_requests")
            .with_description("JSON-RPC attempts, including retries")
            .build();

        let rpc_errors = meter
            .u64_counter("avalytics_rpc_errors")
            .with_description("JSON-RPC attempts that failed or timed out")
            .build();

        let rpc_latency = meter
            .f64_histogram("avalytics_rpc_latency")
            .with_description("Latency of a single JSON-RPC attempt")
            .with_boundaries(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            chain_name,
            blocks_processed,
            transactions_written,
            skipped_blocks,
            partial_failures,
            checkpoint_block,
            chain_tip_block,
            chain_tip_lag,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    fn chain_label(&self) -> KeyValue {
        KeyValue::new("chain", self.chain_name.clone())
    }

    /// One RPC attempt: request count, latency and, on failure, the error count.
    pub fn record_rpc(&self, method: &'static str, latency: Duration, failed: bool) {
        let labels = [self.chain_label(), KeyValue::new("method", method)];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(latency.as_secs_f64(), &labels);
        if failed {
            self.rpc_errors.add(1, &labels);
        }
    }

    pub fn record_batch(&self, blocks: u64, transactions: u64, skipped: u64) {
        let labels = [self.chain_label()];
        self.blocks_processed.add(blocks, &labels);
        self.transactions_written.add(transactions, &labels);
        self.skipped_blocks.add(skipped, &labels);
    }

    pub fn record_partial_failure(&self) {
        self.partial_failures.add(1, &[self.chain_label()]);
    }

    pub fn record_checkpoint(&self, block: u64) {
        self.checkpoint_block.record(block, &[self.chain_label()]);
    }

    pub fn record_chain_tip(&self, head: u64, checkpoint: Option<u64>) {
        let labels = [self.chain_label()];
        self.chain_tip_block.record(head, &labels);
        if let Some(checkpoint) = checkpoint {
            self.chain_tip_lag.record(head.saturating_sub(checkpoint), &labels);
        }
    }

    /// Current metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        encode_registry(&self.registry)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> anyhow::Result<()> {
        let addr = format!("{addr}:{port}").parse::<SocketAddr>()?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!("Serving metrics on {} ({})", addr, access_url);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

fn encode_registry(registry: &prometheus::Registry) -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> Result<String, StatusCode> {
    encode_registry(&registry).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
