//! Error types for configuration loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal configuration errors. Any of these must stop startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two entries in the same section share a name.
    #[error("duplicate {section} name '{name}'")]
    DuplicateName {
        /// Section containing the duplicate (`clusters` or `dataCubes`).
        section: &'static str,
        /// Offending name.
        name: String,
    },
    /// A cluster used the name reserved for file-backed data cubes.
    #[error("cluster name '{name}' is reserved")]
    ReservedName {
        /// Offending name.
        name: String,
    },
    /// A data cube references a cluster that is not configured.
    #[error("data cube '{data_cube}' references unknown cluster '{cluster}'")]
    UnknownCluster {
        /// Data cube holding the reference.
        data_cube: String,
        /// Cluster name that could not be resolved.
        cluster: String,
    },
    /// A non-zero interval was configured below the accepted floor.
    #[error("{field} for cluster '{cluster}' can not be < {floor} (is {value})")]
    IntervalTooSmall {
        /// Cluster holding the interval.
        cluster: String,
        /// Interval field name.
        field: &'static str,
        /// Minimum accepted value in milliseconds.
        floor: u64,
        /// Configured value in milliseconds.
        value: u64,
    },
    /// A cluster references a request decorator that is not registered.
    #[error("cluster '{cluster}' references unknown request decorator '{decorator}'")]
    UnknownDecorator {
        /// Cluster holding the reference.
        cluster: String,
        /// Decorator name that could not be resolved.
        decorator: String,
    },
    /// Field contained an invalid value.
    #[error("invalid value for '{field}' in '{section}': {reason}")]
    InvalidField {
        /// Entry that failed validation.
        section: String,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// File extension does not map to a supported document format.
    #[error("unsupported configuration format for '{}'", path.display())]
    UnsupportedFormat {
        /// Path of the document.
        path: PathBuf,
    },
    /// YAML document could not be parsed or rendered.
    #[error("invalid YAML configuration document")]
    Yaml {
        /// Underlying serde error.
        source: serde_yaml::Error,
    },
    /// JSON document could not be parsed or rendered.
    #[error("invalid JSON configuration document")]
    Json {
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
