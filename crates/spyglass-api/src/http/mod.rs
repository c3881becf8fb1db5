//! HTTP surface modules (routers, handlers, problem responses).

/// Shared constants and header names for HTTP surfaces.
pub mod constants;
/// Problem response helpers and error types.
pub mod errors;
/// Health and diagnostics endpoints.
pub mod health;
/// Router construction and server host.
pub mod router;
/// Sources and settings handlers.
pub mod sources;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
