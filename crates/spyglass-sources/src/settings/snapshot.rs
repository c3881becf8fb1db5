//! Immutable settings snapshot and the data cubes it carries.
//!
//! Snapshots are replaced wholesale; every mutation here works on a private
//! copy produced by the orchestrator before it is published.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use spyglass_config::{
    AppConfig, AttributeInfo, AttributeType, ClusterConfig, Customization, DataCubeConfig,
    RefreshRuleKind,
};

use crate::dataset::Dataset;
use crate::external::External;

/// Binding of a data cube to the cluster external that serves its queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Executor {
    /// Owning cluster.
    pub cluster: String,
    /// External queried by the executor.
    pub external: External,
}

/// A data cube as exposed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct DataCube {
    /// Definition as configured, or synthesized for discovered sources.
    pub config: DataCubeConfig,
    /// Resolved attributes.
    pub attributes: Vec<AttributeInfo>,
    /// Resolved dimension names.
    pub dimensions: Vec<String>,
    /// Resolved measure names.
    pub measures: Vec<String>,
    /// Query binding for cluster-backed cubes.
    pub executor: Option<Executor>,
    /// Loaded rows for native cubes.
    pub dataset: Option<Arc<Dataset>>,
    /// Whether the cube came from a source-list scan.
    pub auto_discovered: bool,
}

impl DataCube {
    /// Data cube for a configured definition, bound to `cluster` when given.
    #[must_use]
    pub fn from_config(config: &DataCubeConfig, cluster: Option<&ClusterConfig>) -> Self {
        let executor = cluster.map(|cluster| Executor {
            cluster: cluster.name.clone(),
            external: External::from_data_cube(cluster.engine, config, cluster.version.clone()),
        });
        let mut cube = Self {
            config: config.clone(),
            attributes: Vec::new(),
            dimensions: Vec::new(),
            measures: Vec::new(),
            executor,
            dataset: None,
            auto_discovered: false,
        };
        cube.resolve(&[]);
        cube
    }

    /// Data cube for an external found by a source-list scan.
    #[must_use]
    pub fn discovered(name: &str, cluster: &str, external: &External) -> Self {
        let mut config = DataCubeConfig::new(name, cluster, external.source.clone());
        config.time_attribute.clone_from(&external.time_attribute);
        let mut cube = Self::from_config(&config, None);
        cube.auto_discovered = true;
        cube.apply_external(cluster, external);
        cube
    }

    /// Name of the cube.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Primary time attribute, configured or introspected.
    #[must_use]
    pub fn time_attribute(&self) -> Option<&str> {
        self.config.time_attribute.as_deref().or_else(|| {
            self.executor
                .as_ref()
                .and_then(|executor| executor.external.time_attribute.as_deref())
        })
    }

    /// Bind to a freshly introspected external.
    pub fn apply_external(&mut self, cluster: &str, external: &External) {
        let mut external = external.clone();
        if let Some(time_attribute) = &self.config.time_attribute {
            external.time_attribute = Some(time_attribute.clone());
        }
        let attributes = external.attributes.clone();
        self.executor = Some(Executor {
            cluster: cluster.to_string(),
            external,
        });
        self.resolve(&attributes);
    }

    /// Attach loaded rows.
    pub fn apply_dataset(&mut self, dataset: Arc<Dataset>) {
        let attributes = dataset.attributes.clone();
        self.dataset = Some(dataset);
        self.resolve(&attributes);
    }

    fn resolve(&mut self, introspected: &[AttributeInfo]) {
        let policy = self.config.introspection;
        let mut attributes = if policy.suppresses_introspection() {
            Vec::new()
        } else {
            introspected.to_vec()
        };
        for configured in &self.config.attributes {
            match attributes.iter_mut().find(|a| a.name == configured.name) {
                Some(existing) => *existing = configured.clone(),
                None => attributes.push(configured.clone()),
            }
        }

        self.dimensions = if !self.config.dimensions.is_empty() || !policy.fills_dimensions() {
            self.config.dimensions.clone()
        } else {
            attributes
                .iter()
                .filter(|a| a.kind != AttributeType::Number)
                .map(|a| a.name.clone())
                .collect()
        };
        self.measures = if !self.config.measures.is_empty() || !policy.fills_measures() {
            self.config.measures.clone()
        } else {
            std::iter::once("count".to_string())
                .chain(
                    attributes
                        .iter()
                        .filter(|a| a.kind == AttributeType::Number)
                        .map(|a| a.name.clone()),
                )
                .collect()
        };
        self.attributes = attributes;
    }

    /// Render the cube as a configuration entry with resolved fields.
    #[must_use]
    pub fn to_config(&self) -> DataCubeConfig {
        let mut config = self.config.clone();
        config.attributes.clone_from(&self.attributes);
        config.dimensions.clone_from(&self.dimensions);
        config.measures.clone_from(&self.measures);
        if config.time_attribute.is_none() {
            config.time_attribute = self.time_attribute().map(ToString::to_string);
        }
        config
    }
}

impl Serialize for DataCube {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_config().serialize(serializer)
    }
}

/// Latest known time of one data cube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeTag {
    /// Data cube name.
    pub name: String,
    /// Latest time, when known.
    pub time: Option<DateTime<Utc>>,
    /// When the time was last probed.
    pub last_checked: Option<DateTime<Utc>>,
}

/// Time tags keyed by data cube name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timekeeper {
    tags: BTreeMap<String, TimeTag>,
}

impl Timekeeper {
    /// Tag for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TimeTag> {
        self.tags.get(name)
    }

    /// Record a successful probe.
    pub fn record(&mut self, name: &str, time: DateTime<Utc>, checked: DateTime<Utc>) {
        self.tags.insert(
            name.to_string(),
            TimeTag {
                name: name.to_string(),
                time: Some(time),
                last_checked: Some(checked),
            },
        );
    }

    /// Ensure a tag exists for `cube`, seeding fixed times.
    fn track(&mut self, cube: &DataCubeConfig) {
        let fixed = match cube.refresh_rule.rule {
            RefreshRuleKind::Fixed => cube.refresh_rule.time,
            RefreshRuleKind::Query | RefreshRuleKind::Realtime => None,
        };
        let tag = self.tags.entry(cube.name.clone()).or_insert_with(|| TimeTag {
            name: cube.name.clone(),
            time: None,
            last_checked: None,
        });
        if fixed.is_some() {
            tag.time = fixed;
        }
    }

    fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.tags.retain(|name, _| keep(name));
    }

    /// Number of tracked cubes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Projection served to clients listing sources.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesView {
    /// Clusters with credentials removed.
    pub clusters: Vec<ClusterConfig>,
    /// Every data cube.
    pub data_cubes: Vec<DataCube>,
}

/// Settings as currently known to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    /// Configured clusters.
    pub clusters: Vec<ClusterConfig>,
    /// Configured and discovered data cubes.
    pub data_cubes: Vec<DataCube>,
    /// UI customization block.
    pub customization: Customization,
    /// Latest times per data cube.
    pub timekeeper: Timekeeper,
}

impl SettingsSnapshot {
    /// Data cube named `name`.
    #[must_use]
    pub fn data_cube(&self, name: &str) -> Option<&DataCube> {
        self.data_cubes.iter().find(|cube| cube.name() == name)
    }

    fn data_cube_mut(&mut self, name: &str) -> Option<&mut DataCube> {
        self.data_cubes.iter_mut().find(|cube| cube.name() == name)
    }

    /// Cluster named `name`.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    /// Snapshot for `config`, keeping resolved state of unchanged cubes and
    /// discovered cubes whose cluster survives.
    #[must_use]
    pub fn revised(&self, config: &AppConfig) -> Self {
        let mut data_cubes: Vec<DataCube> = config
            .data_cubes
            .iter()
            .map(|cube| match self.data_cube(&cube.name) {
                Some(existing) if existing.config == *cube && !existing.auto_discovered => {
                    existing.clone()
                }
                _ => DataCube::from_config(cube, config.cluster(&cube.cluster_name)),
            })
            .collect();
        for cube in self.data_cubes.iter().filter(|cube| cube.auto_discovered) {
            let cluster_survives = config.cluster(&cube.config.cluster_name).is_some();
            let name_free = data_cubes.iter().all(|c| c.name() != cube.name());
            if cluster_survives && name_free {
                data_cubes.push(cube.clone());
            }
        }
        self.with_contents(config.clusters.clone(), data_cubes, config.customization.clone())
    }

    /// Snapshot with the given contents and a timekeeper trimmed to match.
    #[must_use]
    pub fn with_contents(
        &self,
        clusters: Vec<ClusterConfig>,
        data_cubes: Vec<DataCube>,
        customization: Customization,
    ) -> Self {
        let mut timekeeper = self.timekeeper.clone();
        timekeeper.retain(|name| data_cubes.iter().any(|cube| cube.name() == name));
        for cube in &data_cubes {
            timekeeper.track(&cube.config);
        }
        Self {
            clusters,
            data_cubes,
            customization,
            timekeeper,
        }
    }

    /// Add or override the cube published under `name` from a cluster
    /// notification. Notifications for unknown clusters are ignored.
    pub fn merge_external(&mut self, cluster: &str, name: &str, external: &External) -> bool {
        if self.cluster(cluster).is_none() {
            return false;
        }
        match self.data_cube_mut(name) {
            Some(cube) if cube.config.cluster_name == cluster => {
                cube.apply_external(cluster, external);
            }
            Some(_) => return false,
            None => {
                let cube = DataCube::discovered(name, cluster, external);
                self.timekeeper.track(&cube.config);
                self.data_cubes.push(cube);
            }
        }
        true
    }

    /// Attach loaded rows to the native cube `name`.
    pub fn merge_dataset(&mut self, name: &str, dataset: Arc<Dataset>) -> bool {
        match self.data_cube_mut(name) {
            Some(cube) if cube.config.is_native() => {
                cube.apply_dataset(dataset);
                true
            }
            _ => false,
        }
    }

    /// Record a successful max-time probe.
    pub fn record_max_time(&mut self, name: &str, time: DateTime<Utc>, checked: DateTime<Utc>) {
        if self.data_cube(name).is_some() {
            self.timekeeper.record(name, time, checked);
        }
    }

    /// The `{clusters, dataCubes}` projection, without credentials.
    #[must_use]
    pub fn sources(&self) -> SourcesView {
        SourcesView {
            clusters: self
                .clusters
                .iter()
                .cloned()
                .map(|mut cluster| {
                    cluster.auth = None;
                    cluster
                })
                .collect(),
            data_cubes: self.data_cubes.clone(),
        }
    }

    /// Render the snapshot as a configuration document.
    #[must_use]
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            clusters: self.clusters.clone(),
            data_cubes: self.data_cubes.iter().map(DataCube::to_config).collect(),
            customization: self.customization.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_config::{Engine, IntrospectionPolicy, NATIVE_CLUSTER};

    fn introspected() -> External {
        let mut external = External::stub(Engine::Druid, "wikipedia", Some("0.22".to_string()));
        external.time_attribute = Some("__time".to_string());
        external.attributes = vec![
            AttributeInfo::new("__time", AttributeType::Time),
            AttributeInfo::new("page", AttributeType::String),
            AttributeInfo::new("added", AttributeType::Number),
        ];
        external
    }

    fn config() -> AppConfig {
        AppConfig {
            clusters: vec![ClusterConfig::new("wiki", Engine::Druid, "http://broker")],
            data_cubes: vec![DataCubeConfig::new("edits", "wiki", "wikipedia")],
            customization: Customization::default(),
        }
    }

    #[test]
    fn autofill_all_derives_dimensions_and_measures() {
        let mut cube = DataCube::from_config(
            &DataCubeConfig::new("edits", "wiki", "wikipedia"),
            None,
        );
        cube.apply_external("wiki", &introspected());
        assert_eq!(cube.dimensions, vec!["__time", "page"]);
        assert_eq!(cube.measures, vec!["count", "added"]);
        assert_eq!(cube.time_attribute(), Some("__time"));
    }

    #[test]
    fn no_autofill_keeps_configured_lists() {
        let mut config = DataCubeConfig::new("edits", "wiki", "wikipedia");
        config.introspection = IntrospectionPolicy::NoAutofill;
        config.dimensions = vec!["page".to_string()];
        let mut cube = DataCube::from_config(&config, None);
        cube.apply_external("wiki", &introspected());
        assert_eq!(cube.attributes.len(), 3);
        assert_eq!(cube.dimensions, vec!["page"]);
        assert!(cube.measures.is_empty());
    }

    #[test]
    fn merge_external_overrides_by_name_and_adds_discovered() {
        let mut snapshot = SettingsSnapshot::default().revised(&config());
        assert!(snapshot.merge_external("wiki", "edits", &introspected()));
        assert_eq!(
            snapshot.data_cube("edits").map(|c| c.attributes.len()),
            Some(3)
        );

        let twitter = External::stub(Engine::Druid, "twitter", None);
        assert!(snapshot.merge_external("wiki", "twitter", &twitter));
        let discovered = snapshot.data_cube("twitter").expect("discovered cube");
        assert!(discovered.auto_discovered);
        assert_eq!(snapshot.timekeeper.len(), 2);

        assert!(!snapshot.merge_external("gone", "x", &twitter));
        assert!(snapshot.data_cube("x").is_none());
    }

    #[test]
    fn revised_drops_cubes_of_removed_clusters() {
        let mut snapshot = SettingsSnapshot::default().revised(&config());
        snapshot.merge_external("wiki", "twitter", &External::stub(Engine::Druid, "twitter", None));

        let kept = snapshot.revised(&config());
        assert!(kept.data_cube("twitter").is_some());

        let emptied = snapshot.revised(&AppConfig::default());
        assert!(emptied.data_cubes.is_empty());
        assert!(emptied.timekeeper.is_empty());
    }

    #[test]
    fn sources_view_strips_credentials() {
        let mut config = config();
        config.clusters[0].auth = Some(spyglass_config::ClusterAuth::BasicAuth {
            username: "admin".to_string(),
            password: "secret".to_string(),
        });
        let snapshot = SettingsSnapshot::default().revised(&config);
        let rendered = serde_json::to_string(&snapshot.sources()).expect("serialize sources");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("dataCubes"));
    }

    #[test]
    fn fixed_refresh_rule_seeds_time_tag() {
        let mut cube = DataCubeConfig::new("offline", NATIVE_CLUSTER, "offline.json");
        cube.refresh_rule.rule = RefreshRuleKind::Fixed;
        cube.refresh_rule.time = Some(DateTime::<Utc>::UNIX_EPOCH);
        let config = AppConfig {
            data_cubes: vec![cube],
            ..AppConfig::default()
        };
        let snapshot = SettingsSnapshot::default().revised(&config);
        assert_eq!(
            snapshot.timekeeper.get("offline").and_then(|tag| tag.time),
            Some(DateTime::<Utc>::UNIX_EPOCH)
        );
    }
}
