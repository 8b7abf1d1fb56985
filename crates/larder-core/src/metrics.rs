//! Prometheus metrics helpers for the Larder system.
//!
//! This module provides centralized metrics initialization and common metric
//! definitions used across Larder components.
//!
//! # Metric Naming Conventions
//!
//! - Prefix: Component name (e.g., `index_`, `hydration_`, `feed_`)
//! - Suffix: Unit or type (e.g., `_total`, `_seconds`)
//! - Labels: Use sparingly to avoid cardinality explosion

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}

/// Register descriptions for common metrics used across Larder.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Indexing Metrics
    // =========================================================================

    describe_counter!(
        "index_records_total",
        "Total record events processed by the indexer"
    );
    describe_counter!(
        "index_records_indexed_total",
        "Records newly indexed into derived tables"
    );
    describe_counter!(
        "index_records_duplicate_total",
        "Record events absorbed as idempotent duplicates"
    );
    describe_counter!(
        "index_records_invalid_total",
        "Record events rejected by parsing or validation"
    );
    describe_counter!(
        "index_records_deleted_total",
        "Records removed from derived tables"
    );
    describe_counter!(
        "index_aggregates_recomputed_total",
        "Per-subject aggregate recomputations"
    );
    describe_histogram!(
        "index_event_duration_seconds",
        "Time spent indexing one record event"
    );

    // =========================================================================
    // Hydration Metrics
    // =========================================================================

    describe_counter!(
        "hydration_fetches_total",
        "Batched entity fetches issued by the hydrator (label: family)"
    );
    describe_counter!(
        "hydration_invalid_records_total",
        "Stored records dropped by the hydration validation gate"
    );

    // =========================================================================
    // Feed Serving Metrics
    // =========================================================================

    describe_counter!(
        "feed_requests_total",
        "Feed requests served (label: feed)"
    );
    describe_counter!(
        "feed_items_returned_total",
        "Feed items returned to clients after rules and presentation"
    );
    describe_counter!(
        "search_fallback_total",
        "Search requests served from the relational store because no search backend is configured"
    );
    describe_gauge!(
        "feed_cache_entries",
        "Entries currently held in the response cache"
    );
}

/// Increment a counter with no labels.
///
/// Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_increment_does_not_panic() {
        ensure_metrics_init();
        increment("test_counter", 0);
        increment("test_counter", 1);
        increment("test_counter", 100);
    }

    #[test]
    fn test_set_gauge_does_not_panic() {
        ensure_metrics_init();
        set_gauge("test_gauge", 0.0);
        set_gauge("test_gauge", 42.5);
        set_gauge("test_gauge", -100.0);
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        // This should be idempotent and not panic
        register_common_metrics();
        register_common_metrics();
    }
}
