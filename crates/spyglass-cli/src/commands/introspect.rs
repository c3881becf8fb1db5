//! `introspect`: one reconciliation pass, printed as a configuration document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use spyglass_sources::{
    ConnectorRegistry, DecoratorRegistry, OrchestratorDeps, OrchestratorOptions, SettingsOptions,
    SettingsOrchestrator, SettingsSource,
};
use spyglass_telemetry::Metrics;
use tracing::info;

use crate::cli::IntrospectArgs;
use crate::commands::load;
use crate::error::{CliError, CliResult};
use crate::output::render_document;

pub(crate) async fn handle_introspect(
    args: &IntrospectArgs,
    connectors: ConnectorRegistry,
) -> CliResult<String> {
    let decorators = DecoratorRegistry::default();
    let config = load(&args.config, &decorators.names()).await?;
    let metrics = Metrics::new().map_err(CliError::failure)?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let orchestrator = SettingsOrchestrator::new(
        SettingsSource::InMemory(config),
        OrchestratorOptions {
            settings_timeout: timeout,
            read_only: true,
            anchor_path: anchor_path(&args.config),
            ..OrchestratorOptions::default()
        },
        OrchestratorDeps {
            connectors,
            decorators,
            metrics,
        },
    );
    let snapshot = orchestrator
        .settings(SettingsOptions::with_timeout(timeout))
        .await;
    orchestrator.shutdown().await;

    info!(
        clusters = snapshot.clusters.len(),
        data_cubes = snapshot.data_cubes.len(),
        "introspection finished"
    );
    render_document(&snapshot.to_app_config(), args.format.into())
}

fn anchor_path(config: &Path) -> PathBuf {
    config
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
