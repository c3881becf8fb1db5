//! Shared state handed to every handler.

use std::collections::BTreeSet;
use std::sync::Arc;

use spyglass_sources::{HealthProbe, SettingsOrchestrator};
use spyglass_telemetry::Metrics;

/// Dependencies reachable from the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Owner of the settings snapshot.
    pub orchestrator: SettingsOrchestrator,
    /// Probe used by `GET /readiness`.
    pub probe: Arc<dyn HealthProbe>,
    /// Registered decorator names, used to validate submitted settings.
    pub decorators: BTreeSet<String>,
    /// Metrics sink rendered by `GET /metrics`.
    pub telemetry: Metrics,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("orchestrator", &self.orchestrator)
            .field("decorators", &self.decorators)
            .finish_non_exhaustive()
    }
}
