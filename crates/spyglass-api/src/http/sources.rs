//! Sources listing and in-memory settings replacement.

use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use spyglass_config::{AppConfig, validate_config};
use spyglass_sources::{SettingsOptions, SourcesError, SourcesView};
use tracing::{error, info, warn};

use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourcesQuery {
    /// Wait bound in milliseconds; zero waits for reconciliation to finish.
    pub(crate) timeout: Option<u64>,
}

impl SourcesQuery {
    fn options(&self) -> SettingsOptions {
        SettingsOptions {
            timeout: self.timeout.map(Duration::from_millis),
        }
    }
}

pub(crate) async fn list_sources(
    State(state): State<ApiState>,
    Query(query): Query<SourcesQuery>,
) -> Json<SourcesView> {
    Json(state.orchestrator.sources(query.options()).await)
}

pub(crate) async fn replace_settings(
    State(state): State<ApiState>,
    payload: Result<Json<AppConfig>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(config) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    validate_config(&config, &state.decorators).map_err(|err| {
        warn!(error = %err, "rejected settings update");
        ApiError::config_invalid(err.to_string())
    })?;

    match state.orchestrator.update_settings(config).await {
        Ok(()) => {
            info!("settings replaced");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(SourcesError::ReadOnly) => Err(ApiError::read_only(
            "settings store is read-only; edit the configuration file instead",
        )),
        Err(err) => {
            error!(error = %err, cause = ?err, "settings update failed");
            Err(ApiError::internal("failed to update settings"))
        }
    }
}
