//! Liveness, readiness and metrics endpoints.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use spyglass_telemetry::build_sha;
use tracing::error;

use crate::http::errors::ApiError;
use crate::state::ApiState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) build: String,
    pub(crate) clusters: usize,
    pub(crate) data_cubes: usize,
}

pub(crate) async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let snapshot = state.orchestrator.snapshot();
    Json(HealthResponse {
        status: "ok",
        build: build_sha().to_string(),
        clusters: snapshot.clusters.len(),
        data_cubes: snapshot.data_cubes.len(),
    })
}

pub(crate) async fn readiness(State(state): State<ApiState>) -> Response {
    let report = state.orchestrator.readiness(state.probe.as_ref()).await;
    let status = StatusCode::from_u16(report.http_status())
        .unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    (status, Json(report)).into_response()
}

pub(crate) async fn metrics(State(state): State<ApiState>) -> Result<Response, ApiError> {
    match state.telemetry.render() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )
            .body(Body::from(body))
            .map_err(|err| {
                error!(error = %err, "failed to build metrics response");
                ApiError::internal("failed to build metrics response")
            }),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            Err(ApiError::internal("failed to render metrics"))
        }
    }
}
