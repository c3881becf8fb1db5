//! Lifecycle of one external cluster connection.
//!
//! # Design
//! - The manager is a cheap clonable handle; interval tasks hold a weak
//!   reference so dropping every handle also stops the timers.
//! - Every call to the cluster is a suspension point. Results that arrive
//!   after `destroy` are dropped instead of reaching the listener.
//! - Failures are logged with the cluster name, counted, and never propagated.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use spyglass_config::{ClusterConfig, DataCubeConfig, SourceListScan};
use spyglass_telemetry::{Metrics, Outcome};

use crate::cluster::SourceListener;
use crate::error::{SourcesError, SourcesResult};
use crate::external::{External, ManagedExternal};
use crate::requester::ClusterRequester;
use crate::scheduler::Scheduler;

/// Result of introspecting one managed external.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectionOutcome {
    /// Schema changed and the listener was notified.
    Changed,
    /// Schema is identical to the stored one.
    Unchanged,
    /// Introspection is suppressed for this external.
    Suppressed,
    /// No managed external carries this name.
    Unknown,
    /// The requester failed; the error was logged.
    Failed,
    /// The manager was destroyed while the request was in flight.
    Discarded,
}

/// Result of one source-list scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Scanning is disabled; no request was made.
    Disabled,
    /// The list was fetched; `discovered` new externals were registered.
    Scanned {
        /// Number of newly registered externals.
        discovered: usize,
    },
    /// The requester failed; the error was logged.
    Failed,
    /// The manager was destroyed while the request was in flight.
    Discarded,
}

#[derive(Debug, Default)]
struct ClusterState {
    version: Option<String>,
    externals: Vec<ManagedExternal>,
}

struct ClusterInner {
    cluster: ClusterConfig,
    requester: Arc<dyn ClusterRequester>,
    listener: Arc<dyn SourceListener>,
    metrics: Metrics,
    state: RwLock<ClusterState>,
    scheduler: Scheduler,
}

/// Manages the externals of one cluster.
#[derive(Clone)]
pub struct ClusterManager {
    inner: Arc<ClusterInner>,
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("cluster", &self.inner.cluster.name)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl ClusterManager {
    /// Create a manager and arm its interval tasks.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        cluster: ClusterConfig,
        requester: Arc<dyn ClusterRequester>,
        initial_externals: Vec<ManagedExternal>,
        listener: Arc<dyn SourceListener>,
        metrics: Metrics,
    ) -> Self {
        let state = ClusterState {
            version: cluster.version.clone(),
            externals: initial_externals,
        };
        let manager = Self {
            inner: Arc::new(ClusterInner {
                scheduler: Scheduler::new(cluster.name.clone()),
                cluster,
                requester,
                listener,
                metrics,
                state: RwLock::new(state),
            }),
        };
        manager.arm_timers();
        manager
    }

    fn arm_timers(&self) {
        let cluster = &self.inner.cluster;
        if let Some(period) = cluster.source_list_refresh() {
            let weak = Arc::downgrade(&self.inner);
            self.inner
                .scheduler
                .every("source-list-refresh", period, move || {
                    let weak = Weak::clone(&weak);
                    async move {
                        if let Some(manager) = Self::upgrade(&weak) {
                            manager.scan_source_list().await;
                        }
                    }
                });
        }
        if let Some(period) = cluster.source_reintrospect() {
            let weak = Arc::downgrade(&self.inner);
            self.inner
                .scheduler
                .every("source-reintrospect", period, move || {
                    let weak = Weak::clone(&weak);
                    async move {
                        if let Some(manager) = Self::upgrade(&weak) {
                            manager.introspect_all().await;
                        }
                    }
                });
        }
    }

    fn upgrade(weak: &Weak<ClusterInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.cluster.name
    }

    /// Configuration the manager was created with.
    #[must_use]
    pub fn cluster(&self) -> &ClusterConfig {
        &self.inner.cluster
    }

    /// Whether [`ClusterManager::destroy`] has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.scheduler.is_cancelled()
    }

    /// Names of the interval tasks still armed.
    #[must_use]
    pub fn active_timers(&self) -> Vec<&'static str> {
        self.inner.scheduler.active_tasks()
    }

    /// Cached engine version.
    pub async fn version(&self) -> Option<String> {
        self.inner.state.read().await.version.clone()
    }

    /// Snapshot of every managed external.
    pub async fn managed_externals(&self) -> Vec<ManagedExternal> {
        self.inner.state.read().await.externals.clone()
    }

    /// External published under `name`. Always `None` once destroyed.
    pub async fn external_by_name(&self, name: &str) -> Option<External> {
        if self.is_destroyed() {
            return None;
        }
        self.inner
            .state
            .read()
            .await
            .externals
            .iter()
            .find(|managed| managed.name == name)
            .map(|managed| managed.external.clone())
    }

    /// Align the configured externals with `cubes`, the data cubes now
    /// configured on this cluster.
    ///
    /// Entries whose source and introspection policy are unchanged keep their
    /// introspected schema. Returns the names that were reset to a stub and
    /// need introspection.
    pub async fn sync_configured(&self, cubes: &[&DataCubeConfig]) -> Vec<String> {
        if self.is_destroyed() {
            return Vec::new();
        }
        let engine = self.inner.cluster.engine;
        let mut state = self.inner.state.write().await;
        let version = state.version.clone();
        state.externals.retain(|managed| {
            managed.auto_discovered || cubes.iter().any(|cube| cube.name == managed.name)
        });

        let mut reset = Vec::new();
        for cube in cubes {
            let fresh = ManagedExternal::configured(engine, cube, version.clone());
            match state
                .externals
                .iter_mut()
                .find(|managed| managed.name == cube.name)
            {
                Some(existing)
                    if !existing.auto_discovered
                        && existing.external.source == fresh.external.source
                        && existing.suppress_introspection == fresh.suppress_introspection => {}
                Some(existing) => {
                    *existing = fresh;
                    reset.push(cube.name.clone());
                }
                None => {
                    state.externals.push(fresh);
                    reset.push(cube.name.clone());
                }
            }
        }
        if !reset.is_empty() {
            debug!(cluster = %self.name(), externals = ?reset, "configured externals reset");
        }
        reset
    }

    /// Discover the version, introspect every known external, then scan once.
    ///
    /// Each step isolates its own failures.
    pub async fn init(&self) {
        self.ensure_version().await;
        self.introspect_all().await;
        self.scan_source_list().await;
        info!(cluster = %self.name(), "cluster manager initialised");
    }

    async fn ensure_version(&self) {
        if !self.inner.cluster.engine.is_versioned() || self.version().await.is_some() {
            return;
        }
        match self.inner.requester.version().await {
            Ok(version) => {
                if self.is_destroyed() {
                    return;
                }
                let mut state = self.inner.state.write().await;
                for managed in &mut state.externals {
                    if managed.external.version.is_none() {
                        managed.external.version = Some(version.clone());
                    }
                }
                debug!(cluster = %self.name(), version = %version, "cluster version detected");
                state.version = Some(version);
            }
            Err(source) => {
                let err = SourcesError::requester("cluster.version", self.name(), source);
                warn!(cluster = %self.name(), error = %err, cause = ?err, "could not determine cluster version");
            }
        }
    }

    /// Introspect every managed external concurrently.
    pub async fn introspect_all(&self) -> Vec<IntrospectionOutcome> {
        let names: Vec<String> = self
            .managed_externals()
            .await
            .into_iter()
            .map(|managed| managed.name)
            .collect();
        join_all(names.iter().map(|name| self.introspect_one(name))).await
    }

    /// Re-introspect the external published under `name`.
    pub async fn introspect_one(&self, name: &str) -> IntrospectionOutcome {
        let Some(current) = self
            .managed_externals()
            .await
            .into_iter()
            .find(|managed| managed.name == name)
        else {
            return IntrospectionOutcome::Unknown;
        };
        if current.suppress_introspection {
            self.inner
                .metrics
                .record_introspection(self.name(), Outcome::Skipped);
            return IntrospectionOutcome::Suppressed;
        }

        let result = self.inner.requester.introspect(&current.external).await;
        self.inner
            .metrics
            .record_introspection(self.name(), Outcome::of(&result));
        let introspected = match result {
            Ok(external) => external,
            Err(source) => {
                let err = SourcesError::requester("cluster.introspect", self.name(), source);
                warn!(
                    cluster = %self.name(),
                    external = %name,
                    error = %err,
                    cause = ?err,
                    "introspection failed"
                );
                return IntrospectionOutcome::Failed;
            }
        };
        if self.is_destroyed() {
            debug!(cluster = %self.name(), external = %name, "discarding introspection for destroyed cluster");
            return IntrospectionOutcome::Discarded;
        }

        {
            let mut state = self.inner.state.write().await;
            let Some(stored) = state
                .externals
                .iter_mut()
                .find(|managed| managed.name == name)
            else {
                return IntrospectionOutcome::Unknown;
            };
            if stored.external.same_schema(&introspected) {
                return IntrospectionOutcome::Unchanged;
            }
            stored.external = introspected.clone();
        }
        self.inner
            .listener
            .on_external_change(self.name(), name, &introspected);
        IntrospectionOutcome::Changed
    }

    /// List the cluster's sources and register any that are not yet managed.
    pub async fn scan_source_list(&self) -> ScanOutcome {
        if self.inner.cluster.source_list_scan == SourceListScan::Disable {
            return ScanOutcome::Disabled;
        }

        let result = self.inner.requester.list_sources().await;
        self.inner
            .metrics
            .record_source_list_scan(self.name(), Outcome::of(&result));
        let sources = match result {
            Ok(sources) => sources,
            Err(source) => {
                let err = SourcesError::requester("cluster.list_sources", self.name(), source);
                warn!(cluster = %self.name(), error = %err, cause = ?err, "source list scan failed");
                return ScanOutcome::Failed;
            }
        };
        if self.is_destroyed() {
            return ScanOutcome::Discarded;
        }

        let discovered = self.register_discovered(sources).await;
        for managed in &discovered {
            self.inner
                .listener
                .on_external_change(self.name(), &managed.name, &managed.external);
        }
        if !discovered.is_empty() {
            info!(cluster = %self.name(), count = discovered.len(), "discovered new sources");
        }
        join_all(
            discovered
                .iter()
                .map(|managed| self.introspect_one(&managed.name)),
        )
        .await;
        ScanOutcome::Scanned {
            discovered: discovered.len(),
        }
    }

    async fn register_discovered(&self, sources: Vec<String>) -> Vec<ManagedExternal> {
        let mut state = self.inner.state.write().await;
        let mut known: BTreeSet<String> = state
            .externals
            .iter()
            .map(|managed| managed.external.source.clone())
            .collect();
        let mut discovered = Vec::new();
        for source in sources {
            if !known.insert(source.clone()) {
                continue;
            }
            let external = External::stub(self.inner.cluster.engine, source, state.version.clone());
            let managed = ManagedExternal {
                name: self.inner.listener.generate_name(self.name(), &external),
                external,
                auto_discovered: true,
                suppress_introspection: false,
            };
            state.externals.push(managed.clone());
            discovered.push(managed);
        }
        discovered
    }

    /// Re-run the on-load work the cluster is configured for.
    pub async fn refresh(&self) {
        if self.is_destroyed() {
            return;
        }
        if self.inner.cluster.source_reintrospect_on_load {
            self.introspect_all().await;
        }
        if self.inner.cluster.source_list_refresh_on_load {
            self.scan_source_list().await;
        }
    }

    /// Latest value of the time attribute of `external`.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::Requester`] when the probe fails.
    pub async fn max_time(&self, external: &External) -> SourcesResult<DateTime<Utc>> {
        self.inner
            .requester
            .max_time(external)
            .await
            .map_err(|source| SourcesError::requester("cluster.max_time", self.name(), source))
    }

    /// Stop every interval task and forget all externals.
    pub async fn destroy(&self) {
        self.inner.scheduler.cancel_all();
        self.inner.state.write().await.externals.clear();
        info!(cluster = %self.name(), "cluster manager destroyed");
    }
}
