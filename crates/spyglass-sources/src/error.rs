//! # Design
//!
//! - Centralize reconciliation errors so background tasks can log one type.
//! - Keep messages constant while carrying context fields for debugging.
//! - Most variants never escape a manager: they are logged and isolated there.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::diff::DiffError;
use crate::requester::RequesterError;

/// Result alias for reconciliation operations.
pub type SourcesResult<T> = Result<T, SourcesError>;

/// Errors raised by the reconciliation subsystem.
#[derive(Debug, Error)]
pub enum SourcesError {
    /// Configuration failed to load or validate.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: spyglass_config::ConfigError,
    },
    /// Settings were written while the store is read-only.
    #[error("settings store is read-only")]
    ReadOnly,
    /// No connector is registered for a cluster's engine.
    #[error("no connector registered for engine '{engine}'")]
    NoConnector {
        /// Cluster that could not be connected.
        cluster: String,
        /// Engine keyword.
        engine: &'static str,
    },
    /// A cluster referenced a decorator missing from the registry.
    #[error("request decorator '{decorator}' is not registered")]
    UnknownDecorator {
        /// Cluster holding the reference.
        cluster: String,
        /// Decorator name.
        decorator: String,
    },
    /// A cluster request failed.
    #[error("cluster request failed")]
    Requester {
        /// Operation identifier.
        operation: &'static str,
        /// Cluster that was queried.
        cluster: String,
        /// Source requester error.
        source: RequesterError,
    },
    /// A named collection could not be reconciled.
    #[error("reconciliation failed")]
    Diff {
        /// Collection identifier.
        collection: &'static str,
        /// Source diff error.
        source: DiffError,
    },
    /// A dataset file could not be read.
    #[error("dataset read failed")]
    DatasetIo {
        /// Resolved dataset path.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// A dataset file could not be parsed.
    #[error("dataset parse failed: {reason}")]
    DatasetParse {
        /// Resolved dataset path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },
    /// The dataset extension does not map to a supported format.
    #[error("unsupported dataset format for '{}'", path.display())]
    DatasetFormat {
        /// Resolved dataset path.
        path: PathBuf,
    },
    /// HTTP client operations failed.
    #[error("http operation failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// URL used for the request.
        url: String,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
}

impl SourcesError {
    pub(crate) const fn config(
        operation: &'static str,
        source: spyglass_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) fn requester(
        operation: &'static str,
        cluster: impl Into<String>,
        source: RequesterError,
    ) -> Self {
        Self::Requester {
            operation,
            cluster: cluster.into(),
            source,
        }
    }
}
