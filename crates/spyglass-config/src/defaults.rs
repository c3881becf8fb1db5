//! Default values applied when a cluster omits optional settings.
//!
//! # Design
//! - Centralize defaults so serde, validation and docs agree.
//! - Intervals are expressed in milliseconds; zero disables the timer.

/// Request timeout applied to cluster calls.
pub const DEFAULT_TIMEOUT_MS: u64 = 40_000;
/// Timeout applied to a single readiness probe.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 1_000;
/// Source-list refresh is disabled unless configured.
pub const DEFAULT_SOURCE_LIST_REFRESH_INTERVAL_MS: u64 = 0;
/// Reintrospection is disabled unless configured.
pub const DEFAULT_SOURCE_REINTROSPECT_INTERVAL_MS: u64 = 0;
/// Smallest non-zero refresh or reintrospection interval accepted.
pub const MIN_REFRESH_INTERVAL_MS: u64 = 1_000;

pub(crate) const fn timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

pub(crate) const fn health_check_timeout_ms() -> u64 {
    DEFAULT_HEALTH_CHECK_TIMEOUT_MS
}

pub(crate) const fn source_list_refresh_interval_ms() -> u64 {
    DEFAULT_SOURCE_LIST_REFRESH_INTERVAL_MS
}

pub(crate) const fn source_reintrospect_interval_ms() -> u64 {
    DEFAULT_SOURCE_REINTROSPECT_INTERVAL_MS
}
