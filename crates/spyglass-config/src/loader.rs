//! File-backed configuration documents.
//!
//! # Design
//! - Format is chosen by file extension; YAML is the default authoring format.
//! - Loading always validates, so callers never observe an unchecked document.

use std::collections::BTreeSet;
use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;
use crate::validate::validate_config;

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (`.yaml`, `.yml`).
    Yaml,
    /// JSON (`.json`).
    Json,
}

impl ConfigFormat {
    /// Infer the format from a path's extension.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedFormat`] for unknown or missing extensions.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Parse a document from text without validating it.
///
/// # Errors
///
/// Returns a format-specific [`ConfigError`] when the text is malformed.
pub fn parse_config(text: &str, format: ConfigFormat) -> ConfigResult<AppConfig> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml { source })
        }
        ConfigFormat::Json => {
            serde_json::from_str(text).map_err(|source| ConfigError::Json { source })
        }
    }
}

/// Render a document back to text.
///
/// # Errors
///
/// Returns a format-specific [`ConfigError`] when serialization fails.
pub fn render_config(config: &AppConfig, format: ConfigFormat) -> ConfigResult<String> {
    match format {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|source| ConfigError::Yaml { source })
        }
        ConfigFormat::Json => serde_json::to_string_pretty(config)
            .map_err(|source| ConfigError::Json { source }),
    }
}

/// Read, parse and validate the document at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, parsed or validated.
pub async fn load_config(path: &Path, decorators: &BTreeSet<String>) -> ConfigResult<AppConfig> {
    let format = ConfigFormat::from_path(path)?;
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "config.read",
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), bytes = text.len(), "read configuration document");

    let config = parse_config(&text, format)?;
    validate_config(&config, decorators)?;
    info!(
        path = %path.display(),
        clusters = config.clusters.len(),
        data_cubes = config.data_cubes.len(),
        "configuration loaded"
    );
    Ok(config)
}
