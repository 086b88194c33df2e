//! Logging and metrics wiring, constructed once by the process entrypoint
//! and threaded through explicitly — no ambient globals (spec §9).
//!
//! Mirrors `core/o11y`'s single `init()` entrypoint and
//! `chain/network/src/stats/metrics.rs`'s grouped-counters-in-one-struct
//! style, minus the OpenTelemetry/Jaeger exporters, which belong to the
//! out-of-scope HTTP layer.

use std::sync::Arc;

use gw_primitives::ErrorKind;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use tracing_subscriber::EnvFilter;

/// Log output format. `Pretty` is meant for local development; `Json` for
/// production log aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Builds and installs the global `tracing` subscriber. Safe to call once
/// per process; a second call is a logic error in the caller, not
/// something this crate tries to guard against (matches the teacher's
/// `core/o11y` init contract).
pub fn init_tracing(filter: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// All counters/gauges/histograms the gateway core publishes. Specific
/// metric *names* exposed over `/metrics` are an integration detail of
/// the out-of-scope HTTP layer (spec §1 Non-goals); this registry only
/// fixes the shapes and labels the core code increments.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    pub failures_total: IntCounterVec,
    pub circuit_breaker_transitions_total: IntCounterVec,
    pub cache_requests_total: IntCounterVec,
    pub coalescer_dedup_total: IntCounterVec,
    pub peer_weight: IntGaugeVec,
    pub fs_cleanup_kept_files: IntGaugeVec,
    pub fs_cleanup_kept_bytes: IntGaugeVec,
    pub chunk_fetch_duration_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();

        let failures_total = IntCounterVec::new(
            Opts::new("gw_failures_total", "Failures by error kind and component"),
            &["component", "kind"],
        )
        .expect("valid metric");

        let circuit_breaker_transitions_total = IntCounterVec::new(
            Opts::new("gw_circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["target", "to_state"],
        )
        .expect("valid metric");

        let cache_requests_total = IntCounterVec::new(
            Opts::new("gw_cache_requests_total", "Cache lookups by outcome"),
            &["cache", "outcome"],
        )
        .expect("valid metric");

        let coalescer_dedup_total = IntCounterVec::new(
            Opts::new("gw_coalescer_dedup_total", "Requests that attached to an in-flight fetch"),
            &["operation"],
        )
        .expect("valid metric");

        let peer_weight = IntGaugeVec::new(
            Opts::new("gw_peer_weight", "Current peer weight"),
            &["category", "peer"],
        )
        .expect("valid metric");

        let fs_cleanup_kept_files = IntGaugeVec::new(
            Opts::new("gw_fs_cleanup_kept_files", "Files kept by the last cleanup traversal"),
            &["cache"],
        )
        .expect("valid metric");

        let fs_cleanup_kept_bytes = IntGaugeVec::new(
            Opts::new("gw_fs_cleanup_kept_bytes", "Bytes kept by the last cleanup traversal"),
            &["cache"],
        )
        .expect("valid metric");

        let chunk_fetch_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "gw_chunk_fetch_duration_seconds",
                "Chunk fetch latency by peer",
            ),
            &["peer"],
        )
        .expect("valid metric");

        for collector in [
            Box::new(failures_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(circuit_breaker_transitions_total.clone()),
            Box::new(cache_requests_total.clone()),
            Box::new(coalescer_dedup_total.clone()),
            Box::new(peer_weight.clone()),
            Box::new(fs_cleanup_kept_files.clone()),
            Box::new(fs_cleanup_kept_bytes.clone()),
            Box::new(chunk_fetch_duration_seconds.clone()),
        ] {
            let _ = registry.register(collector);
        }

        Self {
            registry: Arc::new(registry),
            failures_total,
            circuit_breaker_transitions_total,
            cache_requests_total,
            coalescer_dedup_total,
            peer_weight,
            fs_cleanup_kept_files,
            fs_cleanup_kept_bytes,
            chunk_fetch_duration_seconds,
        }
    }

    pub fn record_failure(&self, component: &str, kind: ErrorKind) {
        self.failures_total.with_label_values(&[component, kind_label(kind)]).inc();
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::VerificationFailed => "verification_failed",
        ErrorKind::NetworkError => "network_error",
        ErrorKind::Timeout => "timeout",
        ErrorKind::CircuitOpen => "circuit_open",
        ErrorKind::RateLimited => "rate_limited",
        ErrorKind::HopsExceeded => "hops_exceeded",
        ErrorKind::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_failures_by_kind() {
        let metrics = MetricsRegistry::new();
        metrics.record_failure("chunks", ErrorKind::VerificationFailed);
        let value = metrics
            .failures_total
            .with_label_values(&["chunks", "verification_failed"])
            .get();
        assert_eq!(value, 1);
    }
}
