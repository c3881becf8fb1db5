//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Background work reports outcomes here instead of dropping them silently.
//! - Collector registration stays private to keep the public API small.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Outcome label attached to counters of background operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Operation completed.
    Success,
    /// Operation failed; the failure was logged and isolated.
    Failure,
    /// Operation was not attempted (disabled or suppressed).
    Skipped,
}

impl Outcome {
    /// Label value rendered in the exposition format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }

    /// Map a `Result` onto success or failure.
    #[must_use]
    pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    introspections_total: IntCounterVec,
    source_list_scans_total: IntCounterVec,
    readiness_probes_total: IntCounterVec,
    max_time_checks_total: IntCounterVec,
    introspection_failures_total: IntCounter,
    settings_wait_timeouts_total: IntCounter,
    managed_clusters: IntGauge,
    managed_datasets: IntGauge,
}

/// Snapshot of selected gauges and counters for diagnostics and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Cluster managers currently alive.
    pub managed_clusters: i64,
    /// Dataset managers currently alive.
    pub managed_datasets: i64,
    /// Introspection attempts that failed.
    pub introspection_failures_total: u64,
    /// Readiness probes reporting an unhealthy cluster.
    pub readiness_failures_total: u64,
    /// Max-time probes that failed.
    pub max_time_failures_total: u64,
    /// Settings requests that gave up waiting for reconciliation.
    pub settings_wait_timeouts_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let introspections_total = counter_vec(
            "source_introspections_total",
            "Source introspection attempts by cluster and outcome",
            &["cluster", "outcome"],
        )?;
        let source_list_scans_total = counter_vec(
            "source_list_scans_total",
            "Source-list scans by cluster and outcome",
            &["cluster", "outcome"],
        )?;
        let readiness_probes_total = counter_vec(
            "readiness_probes_total",
            "Cluster readiness probes by outcome",
            &["outcome"],
        )?;
        let max_time_checks_total = counter_vec(
            "max_time_checks_total",
            "Max-time probes by outcome",
            &["outcome"],
        )?;
        let introspection_failures_total = IntCounter::with_opts(Opts::new(
            "introspection_failures_total",
            "Source introspection failures across all clusters",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "introspection_failures_total",
            source,
        })?;
        let settings_wait_timeouts_total = IntCounter::with_opts(Opts::new(
            "settings_wait_timeouts_total",
            "Settings requests that stopped waiting for reconciliation",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "settings_wait_timeouts_total",
            source,
        })?;
        let managed_clusters =
            IntGauge::with_opts(Opts::new("managed_clusters", "Live cluster managers")).map_err(
                |source| TelemetryError::MetricsCollector {
                    name: "managed_clusters",
                    source,
                },
            )?;
        let managed_datasets =
            IntGauge::with_opts(Opts::new("managed_datasets", "Live dataset managers")).map_err(
                |source| TelemetryError::MetricsCollector {
                    name: "managed_datasets",
                    source,
                },
            )?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "source_introspections_total", &introspections_total)?;
        register(&registry, "source_list_scans_total", &source_list_scans_total)?;
        register(&registry, "readiness_probes_total", &readiness_probes_total)?;
        register(&registry, "max_time_checks_total", &max_time_checks_total)?;
        register(
            &registry,
            "introspection_failures_total",
            &introspection_failures_total,
        )?;
        register(
            &registry,
            "settings_wait_timeouts_total",
            &settings_wait_timeouts_total,
        )?;
        register(&registry, "managed_clusters", &managed_clusters)?;
        register(&registry, "managed_datasets", &managed_datasets)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                introspections_total,
                source_list_scans_total,
                readiness_probes_total,
                max_time_checks_total,
                introspection_failures_total,
                settings_wait_timeouts_total,
                managed_clusters,
                managed_datasets,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record the outcome of introspecting one source.
    pub fn record_introspection(&self, cluster: &str, outcome: Outcome) {
        self.inner
            .introspections_total
            .with_label_values(&[cluster, outcome.as_str()])
            .inc();
        if outcome == Outcome::Failure {
            self.inner.introspection_failures_total.inc();
        }
    }

    /// Record the outcome of a source-list scan.
    pub fn record_source_list_scan(&self, cluster: &str, outcome: Outcome) {
        self.inner
            .source_list_scans_total
            .with_label_values(&[cluster, outcome.as_str()])
            .inc();
    }

    /// Record the outcome of a readiness probe.
    pub fn record_readiness_probe(&self, outcome: Outcome) {
        self.inner
            .readiness_probes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record the outcome of a max-time probe.
    pub fn record_max_time_check(&self, outcome: Outcome) {
        self.inner
            .max_time_checks_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Increment the settings wait timeout counter.
    pub fn inc_settings_wait_timeout(&self) {
        self.inner.settings_wait_timeouts_total.inc();
    }

    /// Adjust the live cluster manager gauge.
    pub fn add_managed_clusters(&self, delta: i64) {
        self.inner.managed_clusters.add(delta);
    }

    /// Adjust the live dataset manager gauge.
    pub fn add_managed_datasets(&self, delta: i64) {
        self.inner.managed_datasets.add(delta);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            managed_clusters: inner.managed_clusters.get(),
            managed_datasets: inner.managed_datasets.get(),
            introspection_failures_total: inner.introspection_failures_total.get(),
            readiness_failures_total: inner
                .readiness_probes_total
                .with_label_values(&[Outcome::Failure.as_str()])
                .get(),
            max_time_failures_total: inner
                .max_time_checks_total
                .with_label_values(&[Outcome::Failure.as_str()])
                .get(),
            settings_wait_timeouts_total: inner.settings_wait_timeouts_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_results() {
        assert_eq!(Outcome::of::<(), ()>(&Ok(())), Outcome::Success);
        assert_eq!(Outcome::of::<(), &str>(&Err("boom")), Outcome::Failure);
        assert_eq!(Outcome::Skipped.as_str(), "skipped");
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/readiness", 503);
        metrics.record_introspection("wiki", Outcome::Failure);
        metrics.record_introspection("wiki", Outcome::Success);
        metrics.record_introspection("other", Outcome::Failure);
        metrics.record_source_list_scan("wiki", Outcome::Success);
        metrics.record_source_list_scan("wiki", Outcome::Skipped);
        metrics.record_readiness_probe(Outcome::Failure);
        metrics.record_max_time_check(Outcome::Failure);
        metrics.inc_settings_wait_timeout();
        metrics.add_managed_clusters(2);
        metrics.add_managed_clusters(-1);
        metrics.add_managed_datasets(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.managed_clusters, 1);
        assert_eq!(snapshot.managed_datasets, 3);
        assert_eq!(snapshot.introspection_failures_total, 2);
        assert_eq!(snapshot.readiness_failures_total, 1);
        assert_eq!(snapshot.max_time_failures_total, 1);
        assert_eq!(snapshot.settings_wait_timeouts_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("source_list_scans_total"));
        assert!(rendered.contains("managed_clusters 1"));
        Ok(())
    }
}
