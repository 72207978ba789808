//! Prometheus metrics for the indexing pipeline, shard lifecycle and search.
//!
//! # Example
//! ```no_run
//! use shard_search::metrics::{self, DOCUMENTS_APPLIED_TOTAL};
//!
//! metrics::init_metrics().unwrap();
//! DOCUMENTS_APPLIED_TOTAL
//!     .with_label_values(&["contacts", "create"])
//!     .inc();
//! ```

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

const NAMESPACE: &str = "shard_search";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Indexing Metrics
    // ============================================================================

    /// Documents applied to a shard writer
    ///
    /// Labels: index, operation
    pub static ref DOCUMENTS_APPLIED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("documents_applied_total", "Document mutations applied to shard writers")
            .namespace(NAMESPACE),
        &["index", "operation"]
    ).expect("Failed to create DOCUMENTS_APPLIED_TOTAL metric");

    /// Requests dropped by the pipeline
    ///
    /// Labels: index, stage
    pub static ref PIPELINE_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("pipeline_failures_total", "Mutation requests that failed in the pipeline")
            .namespace(NAMESPACE),
        &["index", "stage"]
    ).expect("Failed to create PIPELINE_FAILURES_TOTAL metric");

    /// Shard commits
    ///
    /// Labels: index, trigger
    pub static ref COMMITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("commits_total", "Shard writer commits").namespace(NAMESPACE),
        &["index", "trigger"]
    ).expect("Failed to create COMMITS_TOTAL metric");

    /// Searcher refreshes
    ///
    /// Labels: index
    pub static ref REFRESHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("refreshes_total", "Shard searcher refreshes").namespace(NAMESPACE),
        &["index"]
    ).expect("Failed to create REFRESHES_TOTAL metric");

    /// Whether an index is in bulk mode (1) or not (0)
    ///
    /// Labels: index
    pub static ref BULK_MODE: GaugeVec = GaugeVec::new(
        Opts::new("bulk_mode", "Bulk indexing mode per index").namespace(NAMESPACE),
        &["index"]
    ).expect("Failed to create BULK_MODE metric");

    // ============================================================================
    // Search Metrics
    // ============================================================================

    /// Searches executed
    ///
    /// Labels: index, kind
    pub static ref SEARCHES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("searches_total", "Searches executed").namespace(NAMESPACE),
        &["index", "kind"]
    ).expect("Failed to create SEARCHES_TOTAL metric");

    /// Search latency in seconds
    ///
    /// Labels: index
    pub static ref SEARCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("search_duration_seconds", "Search latency in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["index"]
    ).expect("Failed to create SEARCH_DURATION_SECONDS metric");
}

static INIT: OnceCell<()> = OnceCell::new();

/// Register every metric with the global registry. Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    INIT.get_or_try_init(|| {
        PROMETHEUS_REGISTRY.register(Box::new(DOCUMENTS_APPLIED_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(PIPELINE_FAILURES_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(COMMITS_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(REFRESHES_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(BULK_MODE.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(SEARCHES_TOTAL.clone()))?;
        PROMETHEUS_REGISTRY.register(Box::new(SEARCH_DURATION_SECONDS.clone()))?;

        tracing::info!("Prometheus metrics initialized successfully");
        Ok(())
    })
    .map(|_| ())
}

/// Render every registered metric in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
