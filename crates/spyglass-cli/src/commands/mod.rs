//! Command handlers.

mod introspect;
mod validate;

pub(crate) use introspect::handle_introspect;
pub(crate) use validate::handle_validate;

use std::collections::BTreeSet;
use std::path::Path;

use spyglass_config::{AppConfig, ConfigError};

use crate::error::{CliError, CliResult};

/// Load and validate the document at `path`.
///
/// Filesystem failures are operational; anything wrong with the document
/// itself is a validation failure.
pub(crate) async fn load(path: &Path, decorators: &BTreeSet<String>) -> CliResult<AppConfig> {
    spyglass_config::load_config(path, decorators)
        .await
        .map_err(|err| match err {
            ConfigError::Io { .. } => CliError::failure(err),
            other => CliError::validation(describe(&other)),
        })
}

fn describe(err: &ConfigError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
