//! Selection of data cubes whose latest time needs probing.

use std::time::Duration;

use chrono::{DateTime, Utc};

use spyglass_config::RefreshRuleKind;

use crate::settings::snapshot::SettingsSnapshot;

/// Age after which a `query` cube is probed again.
pub const REGULAR_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Age after which a `realtime` cube is probed again.
pub const SPECIAL_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Period of the checker tick.
pub const CHECK_TICK: Duration = Duration::from_secs(1);

/// Staleness thresholds used by the max-time checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckIntervals {
    /// Threshold for the `query` rule.
    pub regular: Duration,
    /// Threshold for the `realtime` rule.
    pub special: Duration,
}

impl Default for CheckIntervals {
    fn default() -> Self {
        Self {
            regular: REGULAR_CHECK_INTERVAL,
            special: SPECIAL_CHECK_INTERVAL,
        }
    }
}

/// Names of queryable data cubes whose time tag is older than their rule allows.
///
/// Cubes never checked are always stale; `fixed` cubes never are.
#[must_use]
pub fn select_stale(
    snapshot: &SettingsSnapshot,
    now: DateTime<Utc>,
    intervals: CheckIntervals,
) -> Vec<String> {
    snapshot
        .data_cubes
        .iter()
        .filter(|cube| cube.executor.is_some())
        .filter(|cube| {
            let threshold = match cube.config.refresh_rule.rule {
                RefreshRuleKind::Query => intervals.regular,
                RefreshRuleKind::Realtime => intervals.special,
                RefreshRuleKind::Fixed => return false,
            };
            let last_checked = snapshot
                .timekeeper
                .get(cube.name())
                .and_then(|tag| tag.last_checked);
            last_checked.is_none_or(|checked| {
                (now - checked)
                    .to_std()
                    .is_ok_and(|age| age > threshold)
            })
        })
        .map(|cube| cube.name().to_string())
        .collect()
}
