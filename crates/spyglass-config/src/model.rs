//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers deserialized from the declarative config document.
//! - Keys are camelCase on the wire; every optional knob has a serde default.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults;

/// Cluster reference used by data cubes backed by a local file.
pub const NATIVE_CLUSTER: &str = "native";

/// Query engine behind a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Columnar store.
    Druid,
    /// `MySQL` relational engine.
    Mysql,
    /// `PostgreSQL` relational engine.
    Postgres,
}

impl Engine {
    /// Render the engine as its configuration keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Druid => "druid",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Whether the engine reports a version that externals must carry.
    #[must_use]
    pub const fn is_versioned(self) -> bool {
        matches!(self, Self::Druid)
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cluster is asked for its full list of sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceListScan {
    /// Never list sources; only configured data cubes are managed.
    Disable,
    /// Discover new sources automatically.
    #[default]
    Auto,
}

/// Strategy the requester uses to discover a source's schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntrospectionStrategy {
    /// Segment metadata with a fallback to the datasource endpoint.
    #[default]
    SegmentMetadataFallback,
    /// Segment metadata only.
    SegmentMetadataOnly,
    /// Datasource endpoint only.
    DatasourceGet,
}

/// Credentials attached to cluster requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClusterAuth {
    /// HTTP basic authentication.
    BasicAuth {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl fmt::Debug for ClusterAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// One configured connection to an external query engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Unique cluster name.
    pub name: String,
    /// Engine type.
    #[serde(rename = "type")]
    pub engine: Engine,
    /// Connection endpoint.
    pub url: String,
    /// Optional credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ClusterAuth>,
    /// Request timeout in milliseconds.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout: u64,
    /// Readiness probe timeout in milliseconds.
    #[serde(default = "defaults::health_check_timeout_ms")]
    pub health_check_timeout: u64,
    /// Source-list scan policy.
    #[serde(default)]
    pub source_list_scan: SourceListScan,
    /// Interval between source-list scans in milliseconds (0 disables).
    #[serde(default = "defaults::source_list_refresh_interval_ms")]
    pub source_list_refresh_interval: u64,
    /// Re-scan the source list whenever settings are requested.
    #[serde(default)]
    pub source_list_refresh_on_load: bool,
    /// Interval between reintrospection passes in milliseconds (0 disables).
    #[serde(default = "defaults::source_reintrospect_interval_ms")]
    pub source_reintrospect_interval: u64,
    /// Reintrospect known sources whenever settings are requested.
    #[serde(default)]
    pub source_reintrospect_on_load: bool,
    /// Introspection strategy forwarded to the requester.
    #[serde(default)]
    pub introspection_strategy: IntrospectionStrategy,
    /// Name of a registered request decorator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_decorator: Option<String>,
    /// Known engine version; discovered at init when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClusterConfig {
    /// Minimal cluster with every optional knob at its default.
    #[must_use]
    pub fn new(name: impl Into<String>, engine: Engine, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine,
            url: url.into(),
            auth: None,
            timeout: defaults::DEFAULT_TIMEOUT_MS,
            health_check_timeout: defaults::DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            source_list_scan: SourceListScan::default(),
            source_list_refresh_interval: defaults::DEFAULT_SOURCE_LIST_REFRESH_INTERVAL_MS,
            source_list_refresh_on_load: false,
            source_reintrospect_interval: defaults::DEFAULT_SOURCE_REINTROSPECT_INTERVAL_MS,
            source_reintrospect_on_load: false,
            introspection_strategy: IntrospectionStrategy::default(),
            request_decorator: None,
            version: None,
        }
    }

    /// Request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Readiness probe timeout.
    #[must_use]
    pub const fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout)
    }

    /// Source-list refresh period, `None` when disabled.
    #[must_use]
    pub const fn source_list_refresh(&self) -> Option<Duration> {
        non_zero_millis(self.source_list_refresh_interval)
    }

    /// Reintrospection period, `None` when disabled.
    #[must_use]
    pub const fn source_reintrospect(&self) -> Option<Duration> {
        non_zero_millis(self.source_reintrospect_interval)
    }
}

const fn non_zero_millis(value: u64) -> Option<Duration> {
    if value == 0 {
        None
    } else {
        Some(Duration::from_millis(value))
    }
}

/// How much of a data cube is derived from the introspected schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntrospectionPolicy {
    /// Do not introspect; the configured attributes are authoritative.
    None,
    /// Introspect attributes but leave dimensions and measures alone.
    NoAutofill,
    /// Fill dimensions from introspected attributes.
    AutofillDimensionsOnly,
    /// Fill measures from introspected attributes.
    AutofillMeasuresOnly,
    /// Fill both dimensions and measures.
    #[default]
    AutofillAll,
}

impl IntrospectionPolicy {
    /// Whether introspection is disabled by configuration.
    #[must_use]
    pub const fn suppresses_introspection(self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether dimensions are derived from attributes.
    #[must_use]
    pub const fn fills_dimensions(self) -> bool {
        matches!(self, Self::AutofillDimensionsOnly | Self::AutofillAll)
    }

    /// Whether measures are derived from attributes.
    #[must_use]
    pub const fn fills_measures(self) -> bool {
        matches!(self, Self::AutofillMeasuresOnly | Self::AutofillAll)
    }
}

/// How a data cube's latest time is kept current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshRuleKind {
    /// Periodically query the cluster for the maximum time.
    #[default]
    Query,
    /// Use the configured fixed time.
    Fixed,
    /// Treat the data as live and check often.
    Realtime,
}

/// Refresh rule attached to a data cube.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRule {
    /// Rule kind.
    #[serde(default)]
    pub rule: RefreshRuleKind,
    /// Fixed time for the `fixed` rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

/// Primitive type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// Timestamp column.
    Time,
    /// Free-form string column.
    String,
    /// Numeric column.
    Number,
    /// Boolean column.
    Boolean,
    /// Multi-value string column.
    Set,
}

/// One column exposed by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeInfo {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Engine-native type name when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_type: Option<String>,
}

impl AttributeInfo {
    /// Attribute without a native type.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            native_type: None,
        }
    }
}

/// Membership filter applied to file-backed rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetFilter {
    /// Attribute inspected on each row.
    pub attribute: String,
    /// Accepted values.
    pub values: Vec<Value>,
}

/// User-facing dataset definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCubeConfig {
    /// Unique data cube name.
    pub name: String,
    /// Owning cluster, or [`NATIVE_CLUSTER`] for file-backed cubes.
    pub cluster_name: String,
    /// Source identifier (cluster source name or file path).
    pub source: String,
    /// Primary time attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_attribute: Option<String>,
    /// Introspection policy.
    #[serde(default)]
    pub introspection: IntrospectionPolicy,
    /// Refresh rule for the latest time.
    #[serde(default)]
    pub refresh_rule: RefreshRule,
    /// Attribute overrides (or the full list when introspection is off).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeInfo>,
    /// Dimension names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    /// Measure names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<String>,
    /// Optional subset filter for file-backed cubes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset_filter: Option<SubsetFilter>,
}

impl DataCubeConfig {
    /// Data cube with default policies bound to `cluster_name`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cluster_name: cluster_name.into(),
            source: source.into(),
            time_attribute: None,
            introspection: IntrospectionPolicy::default(),
            refresh_rule: RefreshRule::default(),
            attributes: Vec::new(),
            dimensions: Vec::new(),
            measures: Vec::new(),
            subset_filter: None,
        }
    }

    /// Whether the cube is backed by a local file.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.cluster_name == NATIVE_CLUSTER
    }
}

/// Opaque UI customization block carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customization {
    /// Page title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Remaining customization keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Root of the declarative configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Configured clusters.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    /// Configured data cubes.
    #[serde(default, alias = "dataSources")]
    pub data_cubes: Vec<DataCubeConfig>,
    /// UI customization.
    #[serde(default)]
    pub customization: Customization,
}

impl AppConfig {
    /// Look up a cluster by name.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|cluster| cluster.name == name)
    }

    /// Look up a data cube by name.
    #[must_use]
    pub fn data_cube(&self, name: &str) -> Option<&DataCubeConfig> {
        self.data_cubes.iter().find(|cube| cube.name == name)
    }

    /// Data cubes backed by local files.
    #[must_use]
    pub fn native_data_cubes(&self) -> Vec<DataCubeConfig> {
        self.data_cubes
            .iter()
            .filter(|cube| cube.is_native())
            .cloned()
            .collect()
    }

    /// Data cubes bound to `cluster`.
    pub fn data_cubes_for<'a>(
        &'a self,
        cluster: &'a str,
    ) -> impl Iterator<Item = &'a DataCubeConfig> + 'a {
        self.data_cubes
            .iter()
            .filter(move |cube| cube.cluster_name == cluster)
    }
}
