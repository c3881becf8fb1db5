use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use spyglass_config::{
    AppConfig, AttributeInfo, AttributeType, ClusterConfig, DataCubeConfig, Engine,
    NATIVE_CLUSTER, RefreshRuleKind, SourceListScan,
};
use spyglass_sources::{
    ClusterConnector, ClusterRequester, ConnectorRegistry, DecoratorRegistry, External,
    HealthProbe, HealthStatus, OrchestratorDeps, OrchestratorOptions, ProbeError,
    RequestDecorator, RequesterError, SettingsOptions, SettingsOrchestrator, SettingsSource,
    SourcesError, SourcesResult,
};
use spyglass_telemetry::Metrics;

#[derive(Default)]
struct FakeCluster {
    sources: Vec<String>,
    hang_introspection: bool,
    max_time: Option<DateTime<Utc>>,
    max_time_calls: AtomicUsize,
}

#[async_trait]
impl ClusterRequester for FakeCluster {
    async fn version(&self) -> Result<String, RequesterError> {
        Ok("0.22.1".to_string())
    }

    async fn list_sources(&self) -> Result<Vec<String>, RequesterError> {
        Ok(self.sources.clone())
    }

    async fn introspect(&self, external: &External) -> Result<External, RequesterError> {
        if self.hang_introspection {
            std::future::pending::<()>().await;
        }
        let mut introspected = external.clone();
        introspected.time_attribute = Some("__time".to_string());
        introspected.attributes = vec![
            AttributeInfo::new("__time", AttributeType::Time),
            AttributeInfo::new("page", AttributeType::String),
            AttributeInfo::new("added", AttributeType::Number),
        ];
        Ok(introspected)
    }

    async fn max_time(&self, _external: &External) -> Result<DateTime<Utc>, RequesterError> {
        self.max_time_calls.fetch_add(1, Ordering::SeqCst);
        self.max_time.ok_or(RequesterError::Timeout)
    }
}

struct FakeConnector {
    cluster: Arc<FakeCluster>,
}

impl ClusterConnector for FakeConnector {
    fn connect(
        &self,
        _cluster: &ClusterConfig,
        _decorator: Option<Arc<dyn RequestDecorator>>,
    ) -> SourcesResult<Arc<dyn ClusterRequester>> {
        Ok(Arc::clone(&self.cluster) as Arc<dyn ClusterRequester>)
    }
}

fn deps(cluster: &Arc<FakeCluster>) -> Result<OrchestratorDeps> {
    Ok(OrchestratorDeps {
        connectors: ConnectorRegistry::default().with(
            Engine::Druid,
            Arc::new(FakeConnector {
                cluster: Arc::clone(cluster),
            }),
        ),
        decorators: DecoratorRegistry::default(),
        metrics: Metrics::new()?,
    })
}

fn wiki_cluster() -> ClusterConfig {
    let mut cluster = ClusterConfig::new("wiki", Engine::Druid, "http://broker:8082");
    cluster.source_list_scan = SourceListScan::Disable;
    cluster
}

fn config_with(cluster: ClusterConfig, cubes: Vec<DataCubeConfig>) -> AppConfig {
    AppConfig {
        clusters: vec![cluster],
        data_cubes: cubes,
        ..AppConfig::default()
    }
}

fn orchestrator(
    config: AppConfig,
    options: OrchestratorOptions,
    cluster: &Arc<FakeCluster>,
) -> Result<SettingsOrchestrator> {
    Ok(SettingsOrchestrator::new(
        SettingsSource::InMemory(config),
        options,
        deps(cluster)?,
    ))
}

fn forever() -> SettingsOptions {
    SettingsOptions::with_timeout(Duration::ZERO)
}

#[tokio::test]
async fn zero_timeout_waits_for_introspection() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let orchestrator = orchestrator(config, OrchestratorOptions::default(), &cluster)?;

    let snapshot = orchestrator.settings(forever()).await;
    let cube = snapshot.data_cube("edits").expect("configured cube");
    assert_eq!(cube.time_attribute(), Some("__time"));
    assert_eq!(cube.dimensions, vec!["__time", "page"]);
    assert_eq!(cube.measures, vec!["count", "added"]);
    let executor = cube.executor.as_ref().expect("executor");
    assert_eq!(executor.cluster, "wiki");
    assert_eq!(executor.external.version.as_deref(), Some("0.22.1"));

    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn bounded_wait_returns_current_snapshot_when_introspection_hangs() -> Result<()> {
    let cluster = Arc::new(FakeCluster {
        hang_introspection: true,
        ..FakeCluster::default()
    });
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let deps = deps(&cluster)?;
    let metrics = deps.metrics.clone();
    let orchestrator = SettingsOrchestrator::new(
        SettingsSource::InMemory(config),
        OrchestratorOptions::default(),
        deps,
    );

    let started = tokio::time::Instant::now();
    let snapshot = orchestrator
        .settings(SettingsOptions::with_timeout(Duration::from_millis(100)))
        .await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let cube = snapshot.data_cube("edits").expect("configured cube");
    assert!(cube.attributes.is_empty());
    assert!(cube.executor.is_some());

    assert_eq!(metrics.snapshot().settings_wait_timeouts_total, 1);
    Ok(())
}

#[tokio::test]
async fn removing_a_cluster_destroys_its_manager() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let mut wiki = wiki_cluster();
    wiki.source_list_refresh_interval = 60_000;
    wiki.source_reintrospect_interval = 60_000;
    let config = config_with(
        wiki,
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let orchestrator = orchestrator(config, OrchestratorOptions::default(), &cluster)?;
    orchestrator.settings(forever()).await;

    let manager = orchestrator
        .cluster_manager("wiki")
        .await
        .expect("manager exists");
    assert_eq!(
        manager.active_timers(),
        vec!["source-list-refresh", "source-reintrospect"]
    );
    assert!(orchestrator.external_by_name("wiki", "edits").await.is_some());

    orchestrator.revise_settings(AppConfig::default()).await?;

    assert!(manager.is_destroyed());
    assert!(manager.active_timers().is_empty());
    assert!(manager.external_by_name("edits").await.is_none());
    assert!(orchestrator.cluster_manager("wiki").await.is_none());
    assert!(orchestrator.external_by_name("wiki", "edits").await.is_none());
    assert!(orchestrator.snapshot().data_cubes.is_empty());
    Ok(())
}

#[tokio::test]
async fn discovered_sources_get_unique_names() -> Result<()> {
    let cluster = Arc::new(FakeCluster {
        sources: vec!["tweets".to_string(), "twitter".to_string(), "pages".to_string()],
        ..FakeCluster::default()
    });
    let mut wiki = wiki_cluster();
    wiki.source_list_scan = SourceListScan::Auto;
    let config = config_with(wiki, vec![DataCubeConfig::new("twitter", "wiki", "tweets")]);
    let orchestrator = orchestrator(config, OrchestratorOptions::default(), &cluster)?;

    let snapshot = orchestrator.settings(forever()).await;
    let mut names: Vec<&str> = snapshot.data_cubes.iter().map(|cube| cube.name()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["pages", "twitter", "twitter1"]);

    let renamed = snapshot.data_cube("twitter1").expect("renamed cube");
    assert!(renamed.auto_discovered);
    assert_eq!(renamed.config.source, "twitter");
    assert_eq!(renamed.measures, vec!["count", "added"]);
    assert!(!snapshot.data_cube("twitter").expect("configured").auto_discovered);
    Ok(())
}

#[tokio::test]
async fn discovered_names_are_reused_after_cluster_returns() -> Result<()> {
    let cluster = Arc::new(FakeCluster {
        sources: vec!["pages".to_string()],
        ..FakeCluster::default()
    });
    let mut wiki = wiki_cluster();
    wiki.source_list_scan = SourceListScan::Auto;
    let config = config_with(wiki, Vec::new());
    let orchestrator = orchestrator(config.clone(), OrchestratorOptions::default(), &cluster)?;

    let snapshot = orchestrator.settings(forever()).await;
    let names: Vec<&str> = snapshot.data_cubes.iter().map(|cube| cube.name()).collect();
    assert_eq!(names, vec!["pages"]);

    orchestrator.revise_settings(AppConfig::default()).await?;
    assert!(orchestrator.snapshot().data_cubes.is_empty());
    orchestrator.revise_settings(config).await?;

    let snapshot = orchestrator.settings(forever()).await;
    let names: Vec<&str> = snapshot.data_cubes.iter().map(|cube| cube.name()).collect();
    assert_eq!(names, vec!["pages"]);
    Ok(())
}

#[tokio::test]
async fn read_only_store_rejects_updates() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let options = OrchestratorOptions {
        read_only: true,
        ..OrchestratorOptions::default()
    };
    let orchestrator = orchestrator(AppConfig::default(), options, &cluster)?;

    let err = orchestrator
        .update_settings(AppConfig::default())
        .await
        .expect_err("read-only");
    assert!(matches!(err, SourcesError::ReadOnly));
    Ok(())
}

#[tokio::test]
async fn update_settings_rebinds_executors_from_live_managers() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let orchestrator = orchestrator(config.clone(), OrchestratorOptions::default(), &cluster)?;
    orchestrator.settings(forever()).await;

    let mut updated = config;
    updated.data_cubes[0].dimensions = vec!["page".to_string()];
    orchestrator.update_settings(updated).await?;

    let snapshot = orchestrator.snapshot();
    let cube = snapshot.data_cube("edits").expect("cube");
    assert_eq!(cube.dimensions, vec!["page"]);
    assert_eq!(cube.measures, vec!["count", "added"]);
    assert_eq!(cube.time_attribute(), Some("__time"));
    Ok(())
}

#[tokio::test]
async fn revised_cube_keeps_schema_of_unchanged_source() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let orchestrator = orchestrator(config.clone(), OrchestratorOptions::default(), &cluster)?;
    orchestrator.settings(forever()).await;

    let mut revised = config;
    revised.data_cubes[0].refresh_rule.rule = RefreshRuleKind::Realtime;
    orchestrator.revise_settings(revised).await?;

    let snapshot = orchestrator.settings(forever()).await;
    let cube = snapshot.data_cube("edits").expect("cube");
    assert_eq!(cube.config.refresh_rule.rule, RefreshRuleKind::Realtime);
    assert_eq!(cube.attributes.len(), 3);
    assert_eq!(cube.dimensions, vec!["__time", "page"]);
    assert_eq!(cube.measures, vec!["count", "added"]);
    assert_eq!(cube.time_attribute(), Some("__time"));
    Ok(())
}

#[tokio::test]
async fn revised_cube_follows_new_source() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
    );
    let orchestrator = orchestrator(config.clone(), OrchestratorOptions::default(), &cluster)?;
    orchestrator.settings(forever()).await;

    let mut revised = config;
    revised.data_cubes[0].source = "wikipedia_v2".to_string();
    orchestrator.revise_settings(revised).await?;

    let external = orchestrator
        .external_by_name("wiki", "edits")
        .await
        .expect("managed external");
    assert_eq!(external.source, "wikipedia_v2");

    let snapshot = orchestrator.settings(forever()).await;
    let cube = snapshot.data_cube("edits").expect("cube");
    let executor = cube.executor.as_ref().expect("executor");
    assert_eq!(executor.external.source, "wikipedia_v2");
    assert_eq!(executor.external.version.as_deref(), Some("0.22.1"));
    assert_eq!(cube.measures, vec!["count", "added"]);
    Ok(())
}

#[tokio::test]
async fn native_cubes_carry_loaded_rows() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rows.json");
    std::fs::write(
        &path,
        r#"[{"country": "NZ", "count": 3}, {"country": "AU", "count": 5}]"#,
    )?;

    let cluster = Arc::new(FakeCluster::default());
    let config = AppConfig {
        data_cubes: vec![DataCubeConfig::new("countries", NATIVE_CLUSTER, "rows.json")],
        ..AppConfig::default()
    };
    let options = OrchestratorOptions {
        anchor_path: dir.path().to_path_buf(),
        ..OrchestratorOptions::default()
    };
    let orchestrator = orchestrator(config, options, &cluster)?;

    let snapshot = orchestrator.settings(forever()).await;
    let cube = snapshot.data_cube("countries").expect("native cube");
    assert_eq!(cube.dataset.as_ref().map(|d| d.rows.len()), Some(2));
    assert!(cube.executor.is_none());
    assert!(orchestrator.dataset_manager("countries").await.is_some());
    Ok(())
}

#[tokio::test]
async fn max_time_checks_probe_only_stale_cubes() -> Result<()> {
    let latest = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1);
    let cluster = Arc::new(FakeCluster {
        max_time: Some(latest),
        ..FakeCluster::default()
    });
    let mut fixed = DataCubeConfig::new("fixed", "wiki", "archive");
    fixed.refresh_rule.rule = RefreshRuleKind::Fixed;
    fixed.refresh_rule.time = Some(DateTime::<Utc>::UNIX_EPOCH);
    let config = config_with(
        wiki_cluster(),
        vec![DataCubeConfig::new("edits", "wiki", "wikipedia"), fixed],
    );
    let options = OrchestratorOptions {
        check_tick: Duration::from_secs(3600),
        ..OrchestratorOptions::default()
    };
    let orchestrator = orchestrator(config, options, &cluster)?;
    orchestrator.settings(forever()).await;

    let now = Utc::now();
    assert_eq!(orchestrator.check_max_times(now).await, 1);
    let tag = orchestrator
        .snapshot()
        .timekeeper
        .get("edits")
        .cloned()
        .expect("time tag");
    assert_eq!(tag.time, Some(latest));
    assert_eq!(tag.last_checked, Some(now));

    assert_eq!(
        orchestrator
            .check_max_times(now + TimeDelta::seconds(30))
            .await,
        0
    );
    Ok(())
}

struct TableProbe {
    results: HashMap<String, Result<(), ProbeError>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl HealthProbe for TableProbe {
    async fn probe(&self, cluster: &ClusterConfig) -> Result<(), ProbeError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(cluster.name.clone());
        self.results.get(&cluster.name).cloned().unwrap_or(Ok(()))
    }
}

#[tokio::test]
async fn readiness_follows_cluster_health() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let orchestrator = orchestrator(
        config_with(wiki_cluster(), Vec::new()),
        OrchestratorOptions::default(),
        &cluster,
    )?;
    orchestrator.settings(forever()).await;

    let healthy = TableProbe {
        results: HashMap::new(),
        calls: Mutex::new(Vec::new()),
    };
    let report = orchestrator.readiness(&healthy).await;
    assert_eq!(report.http_status(), 200);
    assert_eq!(*healthy.calls.lock().expect("calls lock"), vec!["wiki"]);

    let failing = TableProbe {
        results: HashMap::from([("wiki".to_string(), Err(ProbeError::NotInitialized))]),
        calls: Mutex::new(Vec::new()),
    };
    let report = orchestrator.readiness(&failing).await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.http_status(), 503);
    assert_eq!(report.clusters[0].url, "http://broker:8082");
    Ok(())
}

#[tokio::test]
async fn readiness_waits_for_initial_load() -> Result<()> {
    let cluster = Arc::new(FakeCluster::default());
    let orchestrator = orchestrator(
        config_with(wiki_cluster(), Vec::new()),
        OrchestratorOptions::default(),
        &cluster,
    )?;

    let failing = TableProbe {
        results: HashMap::from([("wiki".to_string(), Err(ProbeError::NotInitialized))]),
        calls: Mutex::new(Vec::new()),
    };
    let report = orchestrator.readiness(&failing).await;
    assert_eq!(report.http_status(), 503);
    assert_eq!(*failing.calls.lock().expect("calls lock"), vec!["wiki"]);
    Ok(())
}
