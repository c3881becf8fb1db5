//! Cluster lifecycle management.

mod manager;

pub use manager::{ClusterManager, IntrospectionOutcome, ScanOutcome};

use crate::external::External;

/// Receiver of cluster manager notifications.
pub trait SourceListener: Send + Sync {
    /// An external was added or its schema changed.
    fn on_external_change(&self, cluster: &str, name: &str, external: &External);
    /// Choose a unique published name for an external auto-discovered on
    /// `cluster`.
    fn generate_name(&self, cluster: &str, external: &External) -> String;
}
