//! # Design
//!
//! - Centralize application-level errors for bootstrap and serving.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Environment configuration could not be parsed.
    #[error("invalid environment configuration")]
    InvalidEnv {
        /// Name of the offending environment variable.
        name: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Value that failed to parse.
        value: String,
    },
    /// Source reconciliation operations failed.
    #[error("source operation failed")]
    Sources {
        /// Operation identifier.
        operation: &'static str,
        /// Source reconciliation error.
        source: spyglass_sources::SourcesError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: spyglass_api::ApiServerError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: spyglass_telemetry::TelemetryError,
    },
}

impl AppError {
    pub(crate) const fn sources(
        operation: &'static str,
        source: spyglass_sources::SourcesError,
    ) -> Self {
        Self::Sources { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: spyglass_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: spyglass_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}
