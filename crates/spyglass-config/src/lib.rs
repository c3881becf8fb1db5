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

//! Declarative configuration consumed by the source reconciliation subsystem.
//!
//! Layout: `model.rs` (typed cluster/data cube models), `validate.rs`
//! (load-time invariants), `loader.rs` (YAML/JSON documents on disk),
//! `defaults.rs` (engine defaults and interval floors).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigFormat, load_config, parse_config, render_config};
pub use model::{
    AppConfig, AttributeInfo, AttributeType, ClusterAuth, ClusterConfig, Customization,
    DataCubeConfig, Engine, IntrospectionPolicy, IntrospectionStrategy, NATIVE_CLUSTER,
    RefreshRule, RefreshRuleKind, SourceListScan, SubsetFilter,
};
pub use validate::validate_config;
