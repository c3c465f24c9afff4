//! Prometheus metrics for the shard context.
//!
//! Initialize once at startup:
//! ```ignore
//! let metrics = weft::metrics::init()?;
//! ```
//! and hand the (cheaply clonable) handle to each shard context.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    core::Collector, CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
};

/// Default histogram buckets for lock and acquisition latencies (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0,
];

/// Buckets for task-id spreads and lags (dimensionless id distance).
const LEVEL_DIFF_BUCKETS: &[f64] = &[
    0.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 3_000_000.0, 10_000_000.0,
];

/// Buckets for history blob sizes (bytes).
const SIZE_BUCKETS: &[f64] = &[
    1024.0,
    16.0 * 1024.0,
    256.0 * 1024.0,
    1024.0 * 1024.0,
    4.0 * 1024.0 * 1024.0,
    10.0 * 1024.0 * 1024.0,
    50.0 * 1024.0 * 1024.0,
];

/// Metrics handle containing all shard-context instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Lock discipline
    lock_requests: CounterVec,
    lock_latency: HistogramVec,

    // Shard-info flush observations
    transfer_level_diff: HistogramVec,
    timer_level_diff: HistogramVec,
    transfer_lag: HistogramVec,
    replication_lag: HistogramVec,
    timer_lag: HistogramVec,
    transfer_failovers_in_progress: GaugeVec,
    timer_failovers_in_progress: GaugeVec,

    // Failover latencies
    transfer_failover_latency: HistogramVec,
    timer_failover_latency: HistogramVec,

    // Write gateway
    history_size: HistogramVec,
    namespace_history_size: HistogramVec,

    // Lifecycle
    acquisition_latency: HistogramVec,
    replication_dlq_ack_level: GaugeVec,
}

impl Metrics {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_lock_request(&self, shard: &str) {
        self.lock_requests.with_label_values(&[shard]).inc();
    }

    pub fn record_lock_latency(&self, shard: &str, latency: Duration) {
        self.lock_latency
            .with_label_values(&[shard])
            .observe(latency.as_secs_f64());
    }

    /// Record the ack-level spreads and lags computed on a flush attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn record_shard_info(
        &self,
        shard: &str,
        transfer_level_diff: i64,
        timer_level_diff_ms: i64,
        transfer_lag: i64,
        replication_lag: i64,
        timer_lag_ms: i64,
        transfer_failovers: usize,
        timer_failovers: usize,
    ) {
        self.transfer_level_diff
            .with_label_values(&[shard])
            .observe(transfer_level_diff as f64);
        self.timer_level_diff
            .with_label_values(&[shard])
            .observe(timer_level_diff_ms as f64 / 1_000.0);
        self.transfer_lag
            .with_label_values(&[shard])
            .observe(transfer_lag as f64);
        self.replication_lag
            .with_label_values(&[shard])
            .observe(replication_lag as f64);
        self.timer_lag
            .with_label_values(&[shard])
            .observe(timer_lag_ms as f64 / 1_000.0);
        self.transfer_failovers_in_progress
            .with_label_values(&[shard])
            .set(transfer_failovers as f64);
        self.timer_failovers_in_progress
            .with_label_values(&[shard])
            .set(timer_failovers as f64);
    }

    pub fn record_transfer_failover_latency(&self, shard: &str, latency_ms: i64) {
        self.transfer_failover_latency
            .with_label_values(&[shard])
            .observe(latency_ms.max(0) as f64 / 1_000.0);
    }

    pub fn record_timer_failover_latency(&self, shard: &str, latency_ms: i64) {
        self.timer_failover_latency
            .with_label_values(&[shard])
            .observe(latency_ms.max(0) as f64 / 1_000.0);
    }

    /// Record an appended history blob size, aggregate and (when the
    /// namespace is resolvable) per namespace.
    pub fn record_history_size(&self, shard: &str, namespace: Option<&str>, size: usize) {
        self.history_size
            .with_label_values(&[shard])
            .observe(size as f64);
        if let Some(namespace) = namespace {
            self.namespace_history_size
                .with_label_values(&[namespace])
                .observe(size as f64);
        }
    }

    pub fn record_acquisition_latency(&self, shard: &str, latency_ms: i64) {
        self.acquisition_latency
            .with_label_values(&[shard])
            .observe(latency_ms.max(0) as f64 / 1_000.0);
    }

    pub fn set_replication_dlq_ack_level(&self, shard: &str, source_cluster: &str, level: i64) {
        self.replication_dlq_ack_level
            .with_label_values(&[shard, source_cluster])
            .set(level as f64);
    }
}

/// Helper to register a metric, logging on failure.
fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> C {
    if let Err(e) = registry.register(Box::new(metric.clone())) {
        // Metric may already be registered
        tracing::warn!(error = %e, "failed to register metric");
    }
    metric
}

/// Initialize the metrics system with a fresh Prometheus registry.
pub fn init() -> anyhow::Result<Metrics> {
    let registry = Registry::new();

    let lock_requests = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "weft_shard_lock_requests_total",
                "Total number of shard lock acquisitions (read and write)",
            ),
            &["shard"],
        )?,
    );

    let lock_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_lock_latency_seconds",
                "Time spent waiting for the shard lock",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let transfer_level_diff = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_transfer_level_diff",
                "Spread between max and min per-cluster transfer ack levels",
            )
            .buckets(LEVEL_DIFF_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let timer_level_diff = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_timer_level_diff_seconds",
                "Spread between max and min per-cluster timer ack levels",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let transfer_lag = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_transfer_lag",
                "Transfer ack level lag behind the max read level",
            )
            .buckets(LEVEL_DIFF_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let replication_lag = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_replication_lag",
                "Replication ack level lag behind the max read level",
            )
            .buckets(LEVEL_DIFF_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let timer_lag = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_timer_lag_seconds",
                "Timer ack level lag behind the wall clock",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let transfer_failovers_in_progress = register(
        &registry,
        GaugeVec::new(
            Opts::new(
                "weft_shard_transfer_failovers_in_progress",
                "Number of transfer-queue namespace failovers in progress",
            ),
            &["shard"],
        )?,
    );

    let timer_failovers_in_progress = register(
        &registry,
        GaugeVec::new(
            Opts::new(
                "weft_shard_timer_failovers_in_progress",
                "Number of timer-queue namespace failovers in progress",
            ),
            &["shard"],
        )?,
    );

    let transfer_failover_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_transfer_failover_latency_seconds",
                "Duration of completed transfer-queue failovers",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let timer_failover_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_timer_failover_latency_seconds",
                "Duration of completed timer-queue failovers",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let history_size = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_history_size_bytes",
                "Encoded size of appended history nodes",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let namespace_history_size = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_namespace_history_size_bytes",
                "Encoded size of appended history nodes, per namespace",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
            &["namespace"],
        )?,
    );

    let acquisition_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                "weft_shard_acquisition_latency_seconds",
                "Time between the previous durable shard-info flush and a change of ownership",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["shard"],
        )?,
    );

    let replication_dlq_ack_level = register(
        &registry,
        GaugeVec::new(
            Opts::new(
                "weft_replication_dlq_ack_level",
                "Replication DLQ ack level per source cluster",
            ),
            &["shard", "source_cluster"],
        )?,
    );

    Ok(Metrics {
        registry: Arc::new(registry),
        lock_requests,
        lock_latency,
        transfer_level_diff,
        timer_level_diff,
        transfer_lag,
        replication_lag,
        timer_lag,
        transfer_failovers_in_progress,
        timer_failovers_in_progress,
        transfer_failover_latency,
        timer_failover_latency,
        history_size,
        namespace_history_size,
        acquisition_latency,
        replication_dlq_ack_level,
    })
}
