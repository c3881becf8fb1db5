//! Renderers for command output.

use anyhow::Context;
use spyglass_config::{AppConfig, ConfigFormat};

use crate::error::{CliError, CliResult};

/// Render `config` as a document terminated by a newline.
pub(crate) fn render_document(config: &AppConfig, format: ConfigFormat) -> CliResult<String> {
    let mut rendered = spyglass_config::render_config(config, format)
        .context("failed to render configuration")
        .map_err(CliError::failure)?;
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

pub(crate) fn render_validation_summary(config: &AppConfig) -> String {
    format!(
        "configuration valid: {} cluster(s), {} data cube(s)\n",
        config.clusters.len(),
        config.data_cubes.len()
    )
}
