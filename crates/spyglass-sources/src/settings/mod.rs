//! Settings snapshot, its orchestrator and the max-time checker.

mod max_time;
mod orchestrator;
mod snapshot;

pub use max_time::{
    CHECK_TICK, CheckIntervals, REGULAR_CHECK_INTERVAL, SPECIAL_CHECK_INTERVAL, select_stale,
};
pub use orchestrator::{
    DEFAULT_SETTINGS_TIMEOUT, OrchestratorDeps, OrchestratorOptions, SettingsOptions,
    SettingsOrchestrator, SettingsSource,
};
pub use snapshot::{DataCube, Executor, SettingsSnapshot, SourcesView, TimeTag, Timekeeper};
