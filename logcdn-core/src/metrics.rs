//! Prometheus metrics
//!
//! All metrics live in one registry and are exposed via the `/metrics` endpoint.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::LazyLock;

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "logcdn_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["endpoint", "method", "status"],
        REGISTRY.clone()
    ).expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Garbage collection
pub mod gc {
    use super::{
        register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter,
        IntCounterVec, LazyLock, REGISTRY,
    };

    /// Incoming items completed by GC because their writer went quiet
    pub static ITEMS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_gc_items_completed_total",
            "Number of stale incoming items forcibly completed",
            REGISTRY.clone()
        ).expect("Failed to register ITEMS_COMPLETED")
    });

    pub static ITEMS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_gc_items_deleted_total",
            "Number of items hard-deleted",
            REGISTRY.clone()
        ).expect("Failed to register ITEMS_DELETED")
    });

    pub static BUFFER_EVICTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_gc_buffer_evictions_total",
            "Number of item memberships removed from the buffer unit",
            REGISTRY.clone()
        ).expect("Failed to register BUFFER_EVICTIONS")
    });

    /// Failed GC passes, by task (`purge`, `buffer`, `waiting`, `replication`)
    pub static ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
        register_int_counter_vec_with_registry!(
            "logcdn_gc_errors_total",
            "Number of failed background passes",
            &["task"],
            REGISTRY.clone()
        ).expect("Failed to register ERRORS")
    });
}

/// Ingestion and replication
pub mod content {
    use super::{register_int_counter_with_registry, IntCounter, LazyLock, REGISTRY};

    pub static LINES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_lines_ingested_total",
            "Number of log lines written to the buffer",
            REGISTRY.clone()
        ).expect("Failed to register LINES_INGESTED")
    });

    pub static ITEMS_REPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_items_replicated_total",
            "Number of items copied to a permanent unit",
            REGISTRY.clone()
        ).expect("Failed to register ITEMS_REPLICATED")
    });
}

/// Live streaming
pub mod stream {
    use super::{
        register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
        LazyLock, REGISTRY,
    };

    pub static SUBSCRIBERS: LazyLock<IntGauge> = LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "logcdn_stream_subscribers",
            "Current number of live line subscribers",
            REGISTRY.clone()
        ).expect("Failed to register SUBSCRIBERS")
    });

    /// Subscribers disconnected because their queue filled up
    pub static SUBSCRIBERS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_registry!(
            "logcdn_stream_subscribers_dropped_total",
            "Number of subscribers disconnected for falling behind",
            REGISTRY.clone()
        ).expect("Failed to register SUBSCRIBERS_DROPPED")
    });
}

/// Expose metrics in Prometheus format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}
