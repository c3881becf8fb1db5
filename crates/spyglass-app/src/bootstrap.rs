use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use spyglass_api::{ApiServer, ApiState};
use spyglass_sources::{
    ConnectorRegistry, DEFAULT_SETTINGS_TIMEOUT, DecoratorRegistry, HttpHealthProbe,
    OrchestratorDeps, OrchestratorOptions, SettingsOrchestrator, SettingsSource,
};
use spyglass_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, Metrics, build_sha};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

const ENV_CONFIG: &str = "SPYGLASS_CONFIG";
const ENV_BIND: &str = "SPYGLASS_BIND";
const ENV_SETTINGS_TIMEOUT_MS: &str = "SPYGLASS_SETTINGS_TIMEOUT_MS";
const ENV_READ_ONLY: &str = "SPYGLASS_READ_ONLY";
const ENV_LOG_FORMAT: &str = "SPYGLASS_LOG_FORMAT";
const ENV_LOG_LEVEL: &str = "SPYGLASS_LOG_LEVEL";

const DEFAULT_BIND: &str = "0.0.0.0:9090";

/// Runtime knobs read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Configuration document to load.
    pub config_path: PathBuf,
    /// Listener address for the HTTP API.
    pub bind: SocketAddr,
    /// Default bound on how long settings requests wait for reconciliation.
    pub settings_timeout: Duration,
    /// Reject settings replacement over HTTP.
    pub read_only: bool,
    /// Fallback log level when `RUST_LOG` is absent.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl AppSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::MissingEnv`] when no configuration path is set and
    /// [`AppError::InvalidEnv`] when a value does not parse.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, so tests need not touch the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Same as [`AppSettings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let config_path = lookup(ENV_CONFIG)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(AppError::MissingEnv { name: ENV_CONFIG })?;

        let bind_value = lookup(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_value
            .parse::<SocketAddr>()
            .map_err(|_| AppError::InvalidEnv {
                name: ENV_BIND,
                reason: "not_a_socket_address",
                value: bind_value.clone(),
            })?;

        let settings_timeout = match lookup(ENV_SETTINGS_TIMEOUT_MS) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| AppError::InvalidEnv {
                    name: ENV_SETTINGS_TIMEOUT_MS,
                    reason: "not_a_number",
                    value,
                })?,
            None => DEFAULT_SETTINGS_TIMEOUT,
        };

        let read_only = match lookup(ENV_READ_ONLY) {
            Some(value) => parse_flag(&value).ok_or(AppError::InvalidEnv {
                name: ENV_READ_ONLY,
                reason: "not_a_boolean",
                value,
            })?,
            None => true,
        };

        Ok(Self {
            config_path,
            bind,
            settings_timeout,
            read_only,
            log_level: lookup(ENV_LOG_LEVEL).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_format: lookup(ENV_LOG_FORMAT)
                .map_or_else(LogFormat::infer, |value| LogFormat::from_keyword(&value)),
        })
    }

    fn anchor_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Entry point for the Spyglass server boot sequence.
///
/// # Errors
///
/// Returns an error if the environment is incomplete or the server fails to start.
pub async fn run_app() -> AppResult<()> {
    let settings = AppSettings::from_env()?;
    run_app_with(settings).await
}

async fn run_app_with(settings: AppSettings) -> AppResult<()> {
    spyglass_telemetry::init_logging(&LoggingConfig {
        level: &settings.log_level,
        format: settings.log_format,
        build_sha: build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    info!(
        config = %settings.config_path.display(),
        read_only = settings.read_only,
        "spyglass bootstrap starting"
    );

    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let decorators = DecoratorRegistry::default();
    let probe = HttpHealthProbe::new(decorators.clone())
        .map_err(|err| AppError::sources("readiness.probe", err))?;

    let orchestrator = SettingsOrchestrator::new(
        SettingsSource::File(settings.config_path.clone()),
        OrchestratorOptions {
            settings_timeout: settings.settings_timeout,
            read_only: settings.read_only,
            anchor_path: settings.anchor_path(),
            ..OrchestratorOptions::default()
        },
        OrchestratorDeps {
            connectors: ConnectorRegistry::default(),
            decorators: decorators.clone(),
            metrics: metrics.clone(),
        },
    );

    let api = ApiServer::new(ApiState {
        orchestrator: orchestrator.clone(),
        probe: Arc::new(probe),
        decorators: decorators.names(),
        telemetry: metrics,
    });
    let served = api.serve(settings.bind, shutdown_signal()).await;

    orchestrator.shutdown().await;
    served.map_err(|err| AppError::api_server("api_server.serve", err))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(error = %err, "failed to listen for shutdown signal"),
    }
}
