#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Spyglass server bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (environment settings and service wiring),
//! `error.rs` (application error taxonomy).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;

pub use bootstrap::{AppSettings, run_app};
pub use error::{AppError, AppResult};
