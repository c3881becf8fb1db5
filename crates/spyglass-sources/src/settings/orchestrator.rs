//! Settings orchestration: reconciles configuration into managers and merges
//! their notifications into the published snapshot.
//!
//! # Design
//! - One orchestrator instance owns the snapshot; collaborators receive it by
//!   reference, never through process-wide state.
//! - The snapshot lives in a `watch` channel. Every merge is a single
//!   `send_modify` that swaps in a new `Arc`, so readers never see a partial
//!   update.
//! - "Current work" is a shared future; `settings` waits on it under a
//!   bounded timeout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use spyglass_config::{AppConfig, ClusterConfig, DataCubeConfig, load_config, validate_config};
use spyglass_telemetry::{Metrics, Outcome};

use crate::cluster::{ClusterManager, SourceListener};
use crate::dataset::{Dataset, DatasetListener, DatasetManager};
use crate::diff::diff;
use crate::error::{SourcesError, SourcesResult};
use crate::external::{External, ManagedExternal};
use crate::readiness::{HealthProbe, ReadinessReport, check_readiness};
use crate::requester::{ConnectorRegistry, DecoratorRegistry};
use crate::scheduler::Scheduler;
use crate::settings::max_time::{CHECK_TICK, CheckIntervals, select_stale};
use crate::settings::snapshot::{DataCube, SettingsSnapshot, SourcesView};

/// Default bound on how long `settings` waits for reconciliation.
pub const DEFAULT_SETTINGS_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the initial configuration comes from.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    /// Already parsed configuration; validated before use.
    InMemory(AppConfig),
    /// Configuration file loaded and validated on startup.
    File(PathBuf),
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Default wait bound for `settings`; zero waits forever.
    pub settings_timeout: Duration,
    /// Reject `update_settings` when set.
    pub read_only: bool,
    /// Directory relative dataset paths are resolved against.
    pub anchor_path: PathBuf,
    /// Staleness thresholds for the max-time checker.
    pub check_intervals: CheckIntervals,
    /// Period of the max-time checker.
    pub check_tick: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            settings_timeout: DEFAULT_SETTINGS_TIMEOUT,
            read_only: false,
            anchor_path: PathBuf::from("."),
            check_intervals: CheckIntervals::default(),
            check_tick: CHECK_TICK,
        }
    }
}

/// Collaborators injected into the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorDeps {
    /// Requester factories per engine.
    pub connectors: ConnectorRegistry,
    /// Named request decorators.
    pub decorators: DecoratorRegistry,
    /// Outcome sink.
    pub metrics: Metrics,
}

/// Per-call options for [`SettingsOrchestrator::settings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsOptions {
    /// Wait bound; `None` uses the configured default, zero waits forever.
    pub timeout: Option<Duration>,
}

impl SettingsOptions {
    /// Options with an explicit wait bound.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

type CurrentWork = Shared<BoxFuture<'static, ()>>;

struct SnapshotMerger {
    snapshot: watch::Sender<Arc<SettingsSnapshot>>,
    /// Generated names handed out but possibly not merged yet, by owning cluster.
    reserved_names: Mutex<BTreeMap<String, String>>,
}

impl SnapshotMerger {
    fn modify(&self, change: impl FnOnce(&mut SettingsSnapshot) -> bool) {
        self.snapshot.send_if_modified(|current| {
            let mut next = SettingsSnapshot::clone(current);
            let changed = change(&mut next);
            if changed {
                *current = Arc::new(next);
            }
            changed
        });
    }

    fn release_names(&self, cluster: &str) {
        self.reserved_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| owner != cluster);
    }
}

impl SourceListener for SnapshotMerger {
    fn on_external_change(&self, cluster: &str, name: &str, external: &External) {
        debug!(cluster = %cluster, data_cube = %name, "merging external change");
        self.modify(|snapshot| snapshot.merge_external(cluster, name, external));
    }

    fn generate_name(&self, cluster: &str, external: &External) -> String {
        let snapshot = Arc::clone(&self.snapshot.borrow());
        let mut reserved = self
            .reserved_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let base = external.source.clone();
        let mut candidate = base.clone();
        let mut suffix = 1_u32;
        while snapshot.data_cube(&candidate).is_some() || reserved.contains_key(&candidate) {
            candidate = format!("{base}{suffix}");
            suffix += 1;
        }
        reserved.insert(candidate.clone(), cluster.to_string());
        candidate
    }
}

impl DatasetListener for SnapshotMerger {
    fn on_dataset_change(&self, name: &str, dataset: Arc<Dataset>) {
        debug!(data_cube = %name, rows = dataset.rows.len(), "merging dataset change");
        self.modify(|snapshot| snapshot.merge_dataset(name, dataset));
    }
}

struct OrchestratorInner {
    options: OrchestratorOptions,
    deps: OrchestratorDeps,
    merger: Arc<SnapshotMerger>,
    config: RwLock<AppConfig>,
    clusters: RwLock<BTreeMap<String, ClusterManager>>,
    datasets: RwLock<BTreeMap<String, DatasetManager>>,
    current_work: Mutex<CurrentWork>,
    scheduler: Scheduler,
}

/// Owner of the settings snapshot and of every source manager.
#[derive(Clone)]
pub struct SettingsOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for SettingsOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsOrchestrator")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl SettingsOrchestrator {
    /// Create the orchestrator, start loading `source` and arm the max-time
    /// checker.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(source: SettingsSource, options: OrchestratorOptions, deps: OrchestratorDeps) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(SettingsSnapshot::default()));
        let orchestrator = Self {
            inner: Arc::new(OrchestratorInner {
                scheduler: Scheduler::new("settings"),
                options,
                deps,
                merger: Arc::new(SnapshotMerger {
                    snapshot,
                    reserved_names: Mutex::new(BTreeMap::new()),
                }),
                config: RwLock::new(AppConfig::default()),
                clusters: RwLock::new(BTreeMap::new()),
                datasets: RwLock::new(BTreeMap::new()),
                current_work: Mutex::new(futures_util::future::ready(()).boxed().shared()),
            }),
        };
        orchestrator.start_work(source);
        orchestrator.arm_max_time_checker();
        orchestrator
    }

    fn start_work(&self, source: SettingsSource) {
        let orchestrator = self.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = orchestrator.load_initial(source).await {
                warn!(error = %err, cause = ?err, "initial settings load failed");
            }
        });
        let work = async move {
            if let Err(err) = task.await {
                warn!(error = %err, "settings work task aborted");
            }
        }
        .boxed()
        .shared();
        *self.lock_work() = work;
    }

    fn lock_work(&self) -> std::sync::MutexGuard<'_, CurrentWork> {
        self.inner
            .current_work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_max_time_checker(&self) {
        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .every("max-time-check", self.inner.options.check_tick, move || {
                let weak = Weak::clone(&weak);
                async move {
                    if let Some(inner) = weak.upgrade() {
                        Self { inner }.check_max_times(Utc::now()).await;
                    }
                }
            });
    }

    async fn load_initial(&self, source: SettingsSource) -> SourcesResult<()> {
        let decorators = self.inner.deps.decorators.names();
        let config = match source {
            SettingsSource::InMemory(config) => {
                validate_config(&config, &decorators)
                    .map_err(|source| SourcesError::config("config.validate", source))?;
                config
            }
            SettingsSource::File(path) => load_config(&path, &decorators)
                .await
                .map_err(|source| SourcesError::config("config.load", source))?,
        };
        self.revise_settings(config).await
    }

    /// Current snapshot without waiting for reconciliation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        Arc::clone(&self.inner.merger.snapshot.borrow())
    }

    /// Receiver notified whenever the snapshot is replaced.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<SettingsSnapshot>> {
        self.inner.merger.snapshot.subscribe()
    }

    /// Configuration most recently passed to [`SettingsOrchestrator::revise_settings`].
    pub async fn config(&self) -> AppConfig {
        self.inner.config.read().await.clone()
    }

    /// Manager of the cluster named `name`.
    pub async fn cluster_manager(&self, name: &str) -> Option<ClusterManager> {
        self.inner.clusters.read().await.get(name).cloned()
    }

    /// Manager of the native data cube named `name`.
    pub async fn dataset_manager(&self, name: &str) -> Option<DatasetManager> {
        self.inner.datasets.read().await.get(name).cloned()
    }

    /// External published as `name` by cluster `cluster`.
    pub async fn external_by_name(&self, cluster: &str, name: &str) -> Option<External> {
        let manager = self.cluster_manager(cluster).await?;
        manager.external_by_name(name).await
    }

    /// Reconcile `config` into managers and the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::Diff`] when the previous configuration holds
    /// duplicate names. Manager failures are logged, not returned.
    pub async fn revise_settings(&self, config: AppConfig) -> SourcesResult<()> {
        let previous = {
            let mut stored = self.inner.config.write().await;
            std::mem::replace(&mut *stored, config.clone())
        };
        self.inner.merger.snapshot.send_modify(|snapshot| {
            *snapshot = Arc::new(snapshot.revised(&config));
        });

        let (clusters, datasets) = tokio::join!(
            self.revise_clusters(&previous, &config),
            self.revise_datasets(&previous, &config)
        );
        clusters?;
        datasets?;
        info!(
            clusters = config.clusters.len(),
            data_cubes = config.data_cubes.len(),
            "settings revised"
        );
        Ok(())
    }

    async fn revise_clusters(&self, previous: &AppConfig, next: &AppConfig) -> SourcesResult<()> {
        let changes = diff(&previous.clusters, &next.clusters).map_err(|source| {
            SourcesError::Diff {
                collection: "clusters",
                source,
            }
        })?;
        for (cluster, _) in &changes.updated {
            info!(cluster = %cluster.name, "cluster configuration changed; keeping existing manager");
        }

        let mut removed = Vec::new();
        let mut started = Vec::new();
        let kept: Vec<ClusterManager>;
        {
            let mut managers = self.inner.clusters.write().await;
            for cluster in &changes.exited {
                if let Some(manager) = managers.remove(&cluster.name) {
                    removed.push(manager);
                }
            }
            for cluster in &changes.entered {
                match self.create_cluster_manager(cluster, next) {
                    Ok(manager) => {
                        managers.insert(cluster.name.clone(), manager.clone());
                        started.push(manager);
                    }
                    Err(err) => {
                        warn!(cluster = %cluster.name, error = %err, cause = ?err, "could not create cluster manager");
                    }
                }
            }
            kept = managers
                .values()
                .filter(|manager| !started.iter().any(|s| s.name() == manager.name()))
                .cloned()
                .collect();
        }

        let metrics = &self.inner.deps.metrics;
        for manager in &removed {
            manager.destroy().await;
            self.inner.merger.release_names(manager.name());
            metrics.add_managed_clusters(-1);
        }
        metrics.add_managed_clusters(count_delta(started.len()));
        join_all(started.iter().map(ClusterManager::init)).await;
        join_all(kept.iter().map(|manager| self.rebind_data_cubes(manager, next))).await;
        Ok(())
    }

    /// Bring a surviving cluster's externals in line with `config` and put
    /// their schema back on the data cubes the revision rebuilt.
    async fn rebind_data_cubes(&self, manager: &ClusterManager, config: &AppConfig) {
        let cubes: Vec<&DataCubeConfig> = config.data_cubes_for(manager.name()).collect();
        let reset = manager.sync_configured(&cubes).await;
        for cube in &cubes {
            let Some(external) = manager.external_by_name(&cube.name).await else {
                continue;
            };
            self.inner.merger.modify(|snapshot| {
                let before = snapshot.data_cube(&cube.name).cloned();
                snapshot.merge_external(manager.name(), &cube.name, &external)
                    && snapshot.data_cube(&cube.name) != before.as_ref()
            });
        }
        join_all(reset.iter().map(|name| manager.introspect_one(name))).await;
    }

    fn create_cluster_manager(
        &self,
        cluster: &ClusterConfig,
        config: &AppConfig,
    ) -> SourcesResult<ClusterManager> {
        let requester = self
            .inner
            .deps
            .connectors
            .connect(cluster, &self.inner.deps.decorators)?;
        let initial = config
            .data_cubes_for(&cluster.name)
            .map(|cube| ManagedExternal::configured(cluster.engine, cube, cluster.version.clone()))
            .collect();
        Ok(ClusterManager::new(
            cluster.clone(),
            requester,
            initial,
            Arc::clone(&self.inner.merger) as Arc<dyn SourceListener>,
            self.inner.deps.metrics.clone(),
        ))
    }

    async fn revise_datasets(&self, previous: &AppConfig, next: &AppConfig) -> SourcesResult<()> {
        let old_cubes = previous.native_data_cubes();
        let new_cubes = next.native_data_cubes();
        let changes = diff(&old_cubes, &new_cubes).map_err(|source| SourcesError::Diff {
            collection: "dataCubes",
            source,
        })?;
        for (cube, _) in &changes.updated {
            info!(data_cube = %cube.name, "dataset configuration changed; keeping existing manager");
        }

        let mut started = Vec::new();
        let mut removed = 0_usize;
        {
            let mut managers = self.inner.datasets.write().await;
            for cube in &changes.exited {
                if let Some(manager) = managers.remove(&cube.name) {
                    manager.destroy();
                    removed += 1;
                }
            }
            for cube in &changes.entered {
                let manager = DatasetManager::new(
                    (*cube).clone(),
                    self.inner.options.anchor_path.clone(),
                    Arc::clone(&self.inner.merger) as Arc<dyn DatasetListener>,
                );
                managers.insert(cube.name.clone(), manager.clone());
                started.push(manager);
            }
        }

        let metrics = &self.inner.deps.metrics;
        metrics.add_managed_datasets(count_delta(started.len()) - count_delta(removed));
        join_all(started.iter().map(DatasetManager::init)).await;
        Ok(())
    }

    /// Snapshot after waiting for current work, bounded by `options`.
    ///
    /// Triggers a non-blocking refresh on every cluster manager; its results
    /// become visible to later calls.
    pub async fn settings(&self, options: SettingsOptions) -> Arc<SettingsSnapshot> {
        let snapshot = self.settled(options).await;
        for manager in self.inner.clusters.read().await.values() {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh().await });
        }
        snapshot
    }

    /// Snapshot after waiting on the current work, without refreshing.
    async fn settled(&self, options: SettingsOptions) -> Arc<SettingsSnapshot> {
        let timeout = options
            .timeout
            .unwrap_or(self.inner.options.settings_timeout);
        let work = self.lock_work().clone();
        if timeout.is_zero() {
            work.await;
        } else if tokio::time::timeout(timeout, work).await.is_err() {
            warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "settings load timed out; serving the current snapshot"
            );
            self.inner.deps.metrics.inc_settings_wait_timeout();
        }
        self.snapshot()
    }

    /// The `{clusters, dataCubes}` projection after [`SettingsOrchestrator::settings`].
    pub async fn sources(&self, options: SettingsOptions) -> SourcesView {
        self.settings(options).await.sources()
    }

    /// Replace the served settings with `config`, rebinding executors from
    /// the live cluster managers. In-memory only.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::ReadOnly`] when the store is read-only.
    pub async fn update_settings(&self, config: AppConfig) -> SourcesResult<()> {
        if self.inner.options.read_only {
            return Err(SourcesError::ReadOnly);
        }

        let managers = self.inner.clusters.read().await.clone();
        let current = self.snapshot();
        let mut data_cubes = Vec::with_capacity(config.data_cubes.len());
        for cube in &config.data_cubes {
            let cluster = config.cluster(&cube.cluster_name);
            let mut data_cube = DataCube::from_config(cube, cluster);
            if let Some(manager) = managers.get(&cube.cluster_name) {
                if let Some(external) = manager.external_by_name(&cube.name).await {
                    data_cube.apply_external(&cube.cluster_name, &external);
                }
            } else if let Some(dataset) = current
                .data_cube(&cube.name)
                .and_then(|existing| existing.dataset.clone())
            {
                data_cube.apply_dataset(dataset);
            }
            data_cubes.push(data_cube);
        }

        self.inner.merger.snapshot.send_modify(|snapshot| {
            *snapshot = Arc::new(snapshot.with_contents(
                config.clusters.clone(),
                data_cubes,
                config.customization.clone(),
            ));
        });
        info!(data_cubes = config.data_cubes.len(), "settings updated");
        Ok(())
    }

    /// Probe max time for every stale data cube. Returns how many were probed.
    pub async fn check_max_times(&self, now: DateTime<Utc>) -> usize {
        let snapshot = self.snapshot();
        let stale = select_stale(&snapshot, now, self.inner.options.check_intervals);
        if stale.is_empty() {
            return 0;
        }

        let managers = self.inner.clusters.read().await.clone();
        let probes = stale.iter().filter_map(|name| {
            let executor = snapshot.data_cube(name)?.executor.clone()?;
            let manager = managers.get(&executor.cluster)?.clone();
            Some(async move { (name, manager.max_time(&executor.external).await) })
        });
        let results = join_all(probes).await;

        let probed = results.len();
        let metrics = &self.inner.deps.metrics;
        for (name, result) in results {
            metrics.record_max_time_check(Outcome::of(&result));
            match result {
                Ok(time) => self
                    .inner
                    .merger
                    .modify(|snapshot| {
                        snapshot.record_max_time(name, time, now);
                        true
                    }),
                Err(err) => {
                    warn!(data_cube = %name, error = %err, cause = ?err, "max time check failed");
                }
            }
        }
        probed
    }

    /// Probe every `druid` cluster once the current work has settled.
    ///
    /// Waits under the default settings timeout, so a request arriving during
    /// the initial load sees the configured clusters rather than none.
    pub async fn readiness(&self, probe: &dyn HealthProbe) -> ReadinessReport {
        let snapshot = self.settled(SettingsOptions::default()).await;
        check_readiness(&snapshot.clusters, probe, &self.inner.deps.metrics).await
    }

    /// Stop the checker and destroy every manager.
    pub async fn shutdown(&self) {
        self.inner.scheduler.cancel_all();
        let clusters = std::mem::take(&mut *self.inner.clusters.write().await);
        for manager in clusters.values() {
            manager.destroy().await;
        }
        let datasets = std::mem::take(&mut *self.inner.datasets.write().await);
        for manager in datasets.values() {
            manager.destroy();
        }
        let metrics = &self.inner.deps.metrics;
        metrics.add_managed_clusters(-count_delta(clusters.len()));
        metrics.add_managed_datasets(-count_delta(datasets.len()));
        info!("settings orchestrator shut down");
    }
}

fn count_delta(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
