//! Seams to the external query library.
//!
//! # Design
//! - `ClusterRequester` is the only way managers talk to a cluster.
//! - Connectors are registered per engine; decorators are registered by name
//!   and resolved when the configuration is validated.
//! - Wire protocols live behind these traits and are supplied by the host.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use spyglass_config::{ClusterConfig, Engine};

use crate::error::{SourcesError, SourcesResult};
use crate::external::External;

/// Failures reported by a requester.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequesterError {
    /// The cluster could not be reached.
    #[error("cluster unreachable: {message}")]
    Unreachable {
        /// Transport message.
        message: String,
    },
    /// The request exceeded the cluster timeout.
    #[error("request timed out")]
    Timeout,
    /// The cluster answered with something unexpected.
    #[error("unexpected response: {message}")]
    Protocol {
        /// Description of the response.
        message: String,
    },
}

/// Operations the reconciliation subsystem needs from a cluster.
#[async_trait]
pub trait ClusterRequester: Send + Sync {
    /// Engine version reported by the cluster.
    async fn version(&self) -> Result<String, RequesterError>;
    /// Names of every source the cluster serves.
    async fn list_sources(&self) -> Result<Vec<String>, RequesterError>;
    /// Current schema of `external`.
    async fn introspect(&self, external: &External) -> Result<External, RequesterError>;
    /// Latest value of the time attribute of `external`.
    async fn max_time(&self, external: &External) -> Result<DateTime<Utc>, RequesterError>;
}

/// Outgoing request as seen by decorators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoratedRequest {
    /// Target URL.
    pub url: String,
    /// Extra headers to send.
    pub headers: BTreeMap<String, String>,
}

/// Hook that adjusts every request sent to a cluster.
pub trait RequestDecorator: Send + Sync {
    /// Mutate the outgoing request in place.
    fn decorate(&self, cluster: &ClusterConfig, request: &mut DecoratedRequest);
}

/// Decorator that adds a fixed set of headers.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: BTreeMap<String, String>,
}

impl StaticHeaders {
    /// Decorator adding `headers` to every request.
    #[must_use]
    pub const fn new(headers: BTreeMap<String, String>) -> Self {
        Self { headers }
    }
}

impl RequestDecorator for StaticHeaders {
    fn decorate(&self, _cluster: &ClusterConfig, request: &mut DecoratedRequest) {
        request.headers.extend(self.headers.clone());
    }
}

/// Named request decorators available to the configuration.
#[derive(Clone, Default)]
pub struct DecoratorRegistry {
    decorators: BTreeMap<String, Arc<dyn RequestDecorator>>,
}

impl fmt::Debug for DecoratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decorators.keys()).finish()
    }
}

impl DecoratorRegistry {
    /// Register `decorator` under `name`, replacing any previous entry.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, decorator: Arc<dyn RequestDecorator>) -> Self {
        self.decorators.insert(name.into(), decorator);
        self
    }

    /// Registered names, as consumed by configuration validation.
    #[must_use]
    pub fn names(&self) -> BTreeSet<String> {
        self.decorators.keys().cloned().collect()
    }

    /// Decorator configured for `cluster`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::UnknownDecorator`] when the name is not registered.
    pub fn resolve(
        &self,
        cluster: &ClusterConfig,
    ) -> SourcesResult<Option<Arc<dyn RequestDecorator>>> {
        let Some(name) = &cluster.request_decorator else {
            return Ok(None);
        };
        self.decorators
            .get(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| SourcesError::UnknownDecorator {
                cluster: cluster.name.clone(),
                decorator: name.clone(),
            })
    }
}

/// Builds a requester for one cluster.
pub trait ClusterConnector: Send + Sync {
    /// Connect to `cluster`, applying `decorator` to every request.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError`] when the connection parameters are unusable.
    fn connect(
        &self,
        cluster: &ClusterConfig,
        decorator: Option<Arc<dyn RequestDecorator>>,
    ) -> SourcesResult<Arc<dyn ClusterRequester>>;
}

/// Connectors keyed by engine.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<&'static str, Arc<dyn ClusterConnector>>,
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.connectors.keys()).finish()
    }
}

impl ConnectorRegistry {
    /// Register `connector` for `engine`.
    #[must_use]
    pub fn with(mut self, engine: Engine, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connectors.insert(engine.as_str(), connector);
        self
    }

    /// Build a requester for `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::NoConnector`] when no connector serves the
    /// engine, or whatever the connector or decorator lookup reports.
    pub fn connect(
        &self,
        cluster: &ClusterConfig,
        decorators: &DecoratorRegistry,
    ) -> SourcesResult<Arc<dyn ClusterRequester>> {
        let connector =
            self.connectors
                .get(cluster.engine.as_str())
                .ok_or_else(|| SourcesError::NoConnector {
                    cluster: cluster.name.clone(),
                    engine: cluster.engine.as_str(),
                })?;
        let decorator = decorators.resolve(cluster)?;
        connector.connect(cluster, decorator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRequester;

    #[async_trait]
    impl ClusterRequester for NullRequester {
        async fn version(&self) -> Result<String, RequesterError> {
            Ok("1".to_string())
        }

        async fn list_sources(&self) -> Result<Vec<String>, RequesterError> {
            Ok(Vec::new())
        }

        async fn introspect(&self, external: &External) -> Result<External, RequesterError> {
            Ok(external.clone())
        }

        async fn max_time(&self, _external: &External) -> Result<DateTime<Utc>, RequesterError> {
            Err(RequesterError::Timeout)
        }
    }

    struct NullConnector;

    impl ClusterConnector for NullConnector {
        fn connect(
            &self,
            _cluster: &ClusterConfig,
            _decorator: Option<Arc<dyn RequestDecorator>>,
        ) -> SourcesResult<Arc<dyn ClusterRequester>> {
            Ok(Arc::new(NullRequester))
        }
    }

    #[test]
    fn connect_requires_registered_engine() {
        let registry = ConnectorRegistry::default().with(Engine::Druid, Arc::new(NullConnector));
        let druid = ClusterConfig::new("wiki", Engine::Druid, "http://broker");
        let mysql = ClusterConfig::new("db", Engine::Mysql, "mysql://db");

        assert!(registry.connect(&druid, &DecoratorRegistry::default()).is_ok());
        assert!(matches!(
            registry.connect(&mysql, &DecoratorRegistry::default()),
            Err(SourcesError::NoConnector { engine: "mysql", .. })
        ));
    }

    #[test]
    fn decorators_resolve_by_name() {
        let headers = BTreeMap::from([("x-tenant".to_string(), "blue".to_string())]);
        let registry =
            DecoratorRegistry::default().with("tenant", Arc::new(StaticHeaders::new(headers)));
        assert_eq!(registry.names(), BTreeSet::from(["tenant".to_string()]));

        let mut cluster = ClusterConfig::new("wiki", Engine::Druid, "http://broker");
        assert!(matches!(registry.resolve(&cluster), Ok(None)));

        cluster.request_decorator = Some("tenant".to_string());
        let decorator = match registry.resolve(&cluster) {
            Ok(Some(decorator)) => decorator,
            _ => panic!("decorator should resolve"),
        };
        let mut request = DecoratedRequest::default();
        decorator.decorate(&cluster, &mut request);
        assert_eq!(request.headers.get("x-tenant").map(String::as_str), Some("blue"));

        cluster.request_decorator = Some("missing".to_string());
        assert!(matches!(
            registry.resolve(&cluster),
            Err(SourcesError::UnknownDecorator { .. })
        ));
    }
}
