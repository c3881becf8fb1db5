//! Request accounting middleware.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use spyglass_telemetry::Metrics;
use tracing::debug;

/// Count each request under its matched route and final status code.
///
/// Unmatched requests are recorded under their raw path.
pub(crate) async fn track_requests(
    State(telemetry): State<Metrics>,
    request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |matched| matched.as_str().to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    telemetry.inc_http_request(&route, status);
    debug!(
        route = %route,
        status,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request recorded"
    );
    response
}
