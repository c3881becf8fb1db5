//! File-backed datasets for `native` data cubes.
//!
//! # Design
//! - Paths are resolved against the anchor directory (the config file's
//!   directory) unless already absolute.
//! - "Never loaded" (`None`) is distinct from "loaded, zero rows".
//! - Failures are logged and leave the previous state untouched.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use spyglass_config::{AttributeInfo, AttributeType, DataCubeConfig, SubsetFilter};

use crate::error::{SourcesError, SourcesResult};

/// One record of a file-backed dataset.
pub type Row = Map<String, Value>;

/// Parsed contents of a dataset file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    /// Records after the subset filter.
    pub rows: Vec<Row>,
    /// Attributes inferred from the rows, overridden by configuration.
    pub attributes: Vec<AttributeInfo>,
}

impl Dataset {
    /// Build a dataset from raw rows for `cube`.
    #[must_use]
    pub fn from_rows(cube: &DataCubeConfig, rows: Vec<Row>) -> Self {
        let rows = match &cube.subset_filter {
            Some(filter) => apply_subset_filter(rows, filter),
            None => rows,
        };
        let attributes = infer_attributes(&rows, cube);
        Self { rows, attributes }
    }
}

/// Receiver of dataset manager notifications.
pub trait DatasetListener: Send + Sync {
    /// A dataset finished loading.
    fn on_dataset_change(&self, name: &str, dataset: Arc<Dataset>);
}

/// Supported dataset encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A JSON array of objects.
    Json,
    /// One JSON object per line.
    NdJson,
    /// A YAML sequence of mappings.
    Yaml,
}

impl DatasetFormat {
    /// Infer the encoding from the file extension.
    ///
    /// # Errors
    ///
    /// Returns [`SourcesError::DatasetFormat`] for unknown extensions.
    pub fn from_path(path: &Path) -> SourcesResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("ndjson" | "jsonl") => Ok(Self::NdJson),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(SourcesError::DatasetFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Parse dataset text in `format`.
///
/// # Errors
///
/// Returns [`SourcesError::DatasetParse`] when the text is not a list of objects.
pub fn parse_rows(text: &str, format: DatasetFormat, path: &Path) -> SourcesResult<Vec<Row>> {
    let parse_error = |reason: String| SourcesError::DatasetParse {
        path: path.to_path_buf(),
        reason,
    };
    match format {
        DatasetFormat::Json => {
            serde_json::from_str::<Vec<Row>>(text).map_err(|err| parse_error(err.to_string()))
        }
        DatasetFormat::NdJson => text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<Row>(line)
                    .map_err(|err| parse_error(format!("line {}: {err}", index + 1)))
            })
            .collect(),
        DatasetFormat::Yaml => {
            serde_yaml::from_str::<Vec<Row>>(text).map_err(|err| parse_error(err.to_string()))
        }
    }
}

fn apply_subset_filter(rows: Vec<Row>, filter: &SubsetFilter) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| {
            row.get(&filter.attribute)
                .is_some_and(|value| filter.values.contains(value))
        })
        .collect()
}

fn infer_attributes(rows: &[Row], cube: &DataCubeConfig) -> Vec<AttributeInfo> {
    let mut seen = BTreeSet::new();
    let mut attributes = Vec::new();
    for row in rows {
        for (name, value) in row {
            if seen.contains(name) {
                continue;
            }
            let kind = if cube.time_attribute.as_deref() == Some(name.as_str()) {
                Some(AttributeType::Time)
            } else {
                value_type(value)
            };
            if let Some(kind) = kind {
                seen.insert(name.clone());
                attributes.push(AttributeInfo::new(name.clone(), kind));
            }
        }
    }

    for configured in &cube.attributes {
        match attributes.iter_mut().find(|a| a.name == configured.name) {
            Some(existing) => *existing = configured.clone(),
            None => attributes.push(configured.clone()),
        }
    }
    attributes
}

const fn value_type(value: &Value) -> Option<AttributeType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(AttributeType::Boolean),
        Value::Number(_) => Some(AttributeType::Number),
        Value::String(_) | Value::Object(_) => Some(AttributeType::String),
        Value::Array(_) => Some(AttributeType::Set),
    }
}

struct DatasetInner {
    cube: DataCubeConfig,
    anchor: PathBuf,
    listener: Arc<dyn DatasetListener>,
    dataset: RwLock<Option<Arc<Dataset>>>,
    lifecycle: CancellationToken,
}

/// Manages one file-backed dataset.
#[derive(Clone)]
pub struct DatasetManager {
    inner: Arc<DatasetInner>,
}

impl std::fmt::Debug for DatasetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetManager")
            .field("data_cube", &self.inner.cube.name)
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

impl DatasetManager {
    /// Manager for `cube`, resolving relative sources against `anchor`.
    #[must_use]
    pub fn new(
        cube: DataCubeConfig,
        anchor: impl Into<PathBuf>,
        listener: Arc<dyn DatasetListener>,
    ) -> Self {
        Self {
            inner: Arc::new(DatasetInner {
                cube,
                anchor: anchor.into(),
                listener,
                dataset: RwLock::new(None),
                lifecycle: CancellationToken::new(),
            }),
        }
    }

    /// Data cube name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.cube.name
    }

    /// Resolved dataset path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        let source = Path::new(&self.inner.cube.source);
        if source.is_absolute() {
            source.to_path_buf()
        } else {
            self.inner.anchor.join(source)
        }
    }

    /// Loaded dataset, `None` until a load succeeds.
    pub async fn dataset(&self) -> Option<Arc<Dataset>> {
        self.inner.dataset.read().await.clone()
    }

    /// Read, parse and publish the dataset.
    ///
    /// Returns whether the dataset was published.
    pub async fn init(&self) -> bool {
        let path = self.path();
        let dataset = match self.load(&path).await {
            Ok(dataset) => Arc::new(dataset),
            Err(err) => {
                warn!(
                    data_cube = %self.name(),
                    path = %path.display(),
                    error = %err,
                    cause = ?err,
                    "dataset load failed"
                );
                return false;
            }
        };
        if self.inner.lifecycle.is_cancelled() {
            return false;
        }

        *self.inner.dataset.write().await = Some(Arc::clone(&dataset));
        info!(data_cube = %self.name(), rows = dataset.rows.len(), "dataset loaded");
        self.inner
            .listener
            .on_dataset_change(self.name(), dataset);
        true
    }

    async fn load(&self, path: &Path) -> SourcesResult<Dataset> {
        let format = DatasetFormat::from_path(path)?;
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| SourcesError::DatasetIo {
                path: path.to_path_buf(),
                source,
            })?;
        let rows = parse_rows(&text, format, path)?;
        Ok(Dataset::from_rows(&self.inner.cube, rows))
    }

    /// Mark the manager dead; a load still in flight is not published.
    pub fn destroy(&self) {
        self.inner.lifecycle.cancel();
    }

    /// Whether [`DatasetManager::destroy`] has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.lifecycle.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spyglass_config::NATIVE_CLUSTER;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        loaded: Mutex<Vec<(String, usize)>>,
    }

    impl DatasetListener for RecordingListener {
        fn on_dataset_change(&self, name: &str, dataset: Arc<Dataset>) {
            self.loaded
                .lock()
                .expect("loaded lock")
                .push((name.to_string(), dataset.rows.len()));
        }
    }

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).expect("create dataset");
        file.write_all(contents.as_bytes()).expect("write dataset");
        path
    }

    #[tokio::test]
    async fn loads_relative_json_and_notifies() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(
            dir.path(),
            "wiki.json",
            r#"[{"time":"2015-09-12T00:00:00Z","page":"Rust","added":12,"robot":false}]"#,
        );
        let mut cube = DataCubeConfig::new("wiki", NATIVE_CLUSTER, "wiki.json");
        cube.time_attribute = Some("time".to_string());
        let listener = Arc::new(RecordingListener::default());
        let manager = DatasetManager::new(
            cube,
            dir.path(),
            Arc::clone(&listener) as Arc<dyn DatasetListener>,
        );

        assert!(manager.dataset().await.is_none());
        assert!(manager.init().await);

        let dataset = manager.dataset().await.expect("dataset loaded");
        assert_eq!(dataset.rows.len(), 1);
        let kinds: Vec<(String, AttributeType)> = dataset
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.kind))
            .collect();
        assert!(kinds.contains(&("time".to_string(), AttributeType::Time)));
        assert!(kinds.contains(&("added".to_string(), AttributeType::Number)));
        assert!(kinds.contains(&("robot".to_string(), AttributeType::Boolean)));
        assert_eq!(
            *listener.loaded.lock().expect("loaded lock"),
            vec![("wiki".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn empty_dataset_is_distinct_from_unloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "empty.ndjson", "\n\n");
        let listener = Arc::new(RecordingListener::default());
        let manager = DatasetManager::new(
            DataCubeConfig::new("empty", NATIVE_CLUSTER, "empty.ndjson"),
            dir.path(),
            listener,
        );

        assert!(manager.init().await);
        let dataset = manager.dataset().await.expect("dataset loaded");
        assert!(dataset.rows.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_logged_and_leaves_state_unloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = Arc::new(RecordingListener::default());
        let manager = DatasetManager::new(
            DataCubeConfig::new("gone", NATIVE_CLUSTER, "gone.json"),
            dir.path(),
            Arc::clone(&listener) as Arc<dyn DatasetListener>,
        );

        assert!(!manager.init().await);
        assert!(manager.dataset().await.is_none());
        assert!(listener.loaded.lock().expect("loaded lock").is_empty());
    }

    #[tokio::test]
    async fn destroyed_manager_does_not_publish() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "rows.yaml", "- a: 1\n- a: 2\n");
        let listener = Arc::new(RecordingListener::default());
        let manager = DatasetManager::new(
            DataCubeConfig::new("rows", NATIVE_CLUSTER, "rows.yaml"),
            dir.path(),
            Arc::clone(&listener) as Arc<dyn DatasetListener>,
        );

        manager.destroy();
        assert!(!manager.init().await);
        assert!(listener.loaded.lock().expect("loaded lock").is_empty());
    }

    #[test]
    fn subset_filter_keeps_matching_rows() {
        let rows = parse_rows(
            "{\"country\":\"NZ\",\"n\":1}\n{\"country\":\"US\",\"n\":2}\n{\"n\":3}\n",
            DatasetFormat::NdJson,
            Path::new("rows.ndjson"),
        )
        .expect("parse ndjson");
        let mut cube = DataCubeConfig::new("rows", NATIVE_CLUSTER, "rows.ndjson");
        cube.subset_filter = Some(SubsetFilter {
            attribute: "country".to_string(),
            values: vec![json!("NZ"), json!("AU")],
        });

        let dataset = Dataset::from_rows(&cube, rows);
        assert_eq!(dataset.rows.len(), 1);
        assert_eq!(dataset.rows[0].get("n"), Some(&json!(1)));
    }

    #[test]
    fn configured_attributes_override_inferred_types() {
        let rows = parse_rows(
            r#"[{"code": 401}]"#,
            DatasetFormat::Json,
            Path::new("codes.json"),
        )
        .expect("parse json");
        let mut cube = DataCubeConfig::new("codes", NATIVE_CLUSTER, "codes.json");
        cube.attributes = vec![AttributeInfo::new("code", AttributeType::String)];

        let dataset = Dataset::from_rows(&cube, rows);
        assert_eq!(dataset.attributes, cube.attributes);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(matches!(
            DatasetFormat::from_path(Path::new("rows.csv")),
            Err(SourcesError::DatasetFormat { .. })
        ));
        assert!(matches!(
            parse_rows("{}", DatasetFormat::Json, Path::new("rows.json")),
            Err(SourcesError::DatasetParse { .. })
        ));
    }
}
