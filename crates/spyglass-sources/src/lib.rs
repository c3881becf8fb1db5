#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Source reconciliation for Spyglass.
//!
//! Layout: `diff.rs` (keyed collection reconciliation), `scheduler.rs`
//! (cancellable interval tasks), `requester.rs` (cluster requester seam and
//! registries), `cluster/` (per-cluster introspection and discovery),
//! `dataset.rs` (native file-backed datasets), `settings/` (snapshot,
//! orchestrator, max-time checker), `readiness.rs` (broker health aggregation).

pub mod cluster;
pub mod dataset;
pub mod diff;
pub mod error;
pub mod external;
pub mod readiness;
pub mod requester;
pub mod scheduler;
pub mod settings;

pub use cluster::{ClusterManager, IntrospectionOutcome, ScanOutcome, SourceListener};
pub use dataset::{Dataset, DatasetFormat, DatasetListener, DatasetManager, Row, parse_rows};
pub use diff::{Changes, DiffError, DiffHandler, Named, diff, reconcile};
pub use error::{SourcesError, SourcesResult};
pub use external::{External, ManagedExternal};
pub use readiness::{
    ClusterHealth, HealthProbe, HealthStatus, HttpHealthProbe, LOAD_STATUS_PATH, ProbeError,
    ReadinessReport, check_readiness,
};
pub use requester::{
    ClusterConnector, ClusterRequester, ConnectorRegistry, DecoratedRequest, DecoratorRegistry,
    RequestDecorator, RequesterError, StaticHeaders,
};
pub use scheduler::Scheduler;
pub use settings::{
    CheckIntervals, DEFAULT_SETTINGS_TIMEOUT, DataCube, Executor, OrchestratorDeps,
    OrchestratorOptions, SettingsOptions, SettingsOrchestrator, SettingsSnapshot, SettingsSource,
    SourcesView, TimeTag, Timekeeper,
};
