//! Aggregate readiness across `druid` clusters.
//!
//! # Design
//! - Probes run in parallel, each bounded by its cluster's health timeout.
//! - One unhealthy cluster makes the aggregate unhealthy.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use spyglass_config::{ClusterAuth, ClusterConfig, Engine};
use spyglass_telemetry::{Metrics, Outcome};

use crate::error::{SourcesError, SourcesResult};
use crate::requester::{DecoratedRequest, DecoratorRegistry};

/// Path probed on each broker.
pub const LOAD_STATUS_PATH: &str = "/druid/broker/v1/loadstatus";

/// Why a cluster is considered unhealthy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The broker answered with a non-200 status.
    #[error("unexpected status {code}")]
    Status {
        /// HTTP status code.
        code: u16,
    },
    /// The broker has not finished loading its inventory.
    #[error("inventory not initialized")]
    NotInitialized,
    /// The request failed before a response arrived.
    #[error("request failed: {message}")]
    Transport {
        /// Transport message.
        message: String,
    },
    /// The probe exceeded the cluster's health check timeout.
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
}

/// Health check for one cluster.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe `cluster`; `Ok` means healthy.
    async fn probe(&self, cluster: &ClusterConfig) -> Result<(), ProbeError>;
}

#[derive(Debug, Deserialize)]
struct LoadStatus {
    #[serde(rename = "inventoryInitialized", default)]
    inventory_initialized: bool,
}

/// Probe that asks the broker's load-status endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    decorators: DecoratorRegistry,
}

impl HttpHealthProbe {
    /// Build a probe sharing one HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::Http`] when the client cannot be constructed.
    pub fn new(decorators: DecoratorRegistry) -> SourcesResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| SourcesError::Http {
                operation: "readiness.client",
                url: String::new(),
                source,
            })?;
        Ok(Self { client, decorators })
    }

    fn request_for(&self, cluster: &ClusterConfig) -> DecoratedRequest {
        let mut request = DecoratedRequest {
            url: format!("{}{LOAD_STATUS_PATH}", cluster.url.trim_end_matches('/')),
            ..DecoratedRequest::default()
        };
        match self.decorators.resolve(cluster) {
            Ok(Some(decorator)) => decorator.decorate(cluster, &mut request),
            Ok(None) => {}
            Err(err) => warn!(cluster = %cluster.name, error = %err, "probing without decorator"),
        }
        request
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, cluster: &ClusterConfig) -> Result<(), ProbeError> {
        let request = self.request_for(cluster);
        let mut builder = self
            .client
            .get(&request.url)
            .timeout(cluster.health_timeout());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ClusterAuth::BasicAuth { username, password }) = &cluster.auth {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder.send().await.map_err(|err| ProbeError::Transport {
            message: err.to_string(),
        })?;
        if response.status() != StatusCode::OK {
            return Err(ProbeError::Status {
                code: response.status().as_u16(),
            });
        }
        let status: LoadStatus = response
            .json()
            .await
            .map_err(|err| ProbeError::Transport {
                message: err.to_string(),
            })?;
        if status.inventory_initialized {
            Ok(())
        } else {
            Err(ProbeError::NotInitialized)
        }
    }
}

/// Health of a cluster or of the whole server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving.
    Healthy,
    /// Not serving.
    Unhealthy,
}

/// Result of probing one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterHealth {
    /// Probed endpoint.
    pub url: String,
    /// Probe verdict.
    pub status: HealthStatus,
    /// Failure reason, empty when healthy.
    pub message: String,
}

/// Aggregate readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Aggregate verdict.
    pub status: HealthStatus,
    /// Per-cluster results in configuration order.
    pub clusters: Vec<ClusterHealth>,
}

impl ReadinessReport {
    /// HTTP status code matching the aggregate verdict.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.status {
            HealthStatus::Healthy => 200,
            HealthStatus::Unhealthy => 503,
        }
    }
}

/// Probe every `druid` cluster in `clusters` and fold the results.
pub async fn check_readiness(
    clusters: &[ClusterConfig],
    probe: &dyn HealthProbe,
    metrics: &Metrics,
) -> ReadinessReport {
    let probes = clusters
        .iter()
        .filter(|cluster| cluster.engine == Engine::Druid)
        .map(|cluster| async move {
            let timeout = cluster.health_timeout();
            let result = tokio::time::timeout(timeout, probe.probe(cluster))
                .await
                .unwrap_or_else(|_| {
                    Err(ProbeError::Timeout {
                        timeout_ms: millis(timeout),
                    })
                });
            (cluster, result)
        });
    let results = join_all(probes).await;

    let mut status = HealthStatus::Healthy;
    let mut reports = Vec::with_capacity(results.len());
    for (cluster, result) in results {
        metrics.record_readiness_probe(Outcome::of(&result));
        let report = match result {
            Ok(()) => ClusterHealth {
                url: cluster.url.clone(),
                status: HealthStatus::Healthy,
                message: String::new(),
            },
            Err(err) => {
                warn!(cluster = %cluster.name, url = %cluster.url, reason = %err, "cluster unhealthy");
                status = HealthStatus::Unhealthy;
                ClusterHealth {
                    url: cluster.url.clone(),
                    status: HealthStatus::Unhealthy,
                    message: err.to_string(),
                }
            }
        };
        reports.push(report);
    }
    ReadinessReport {
        status,
        clusters: reports,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
