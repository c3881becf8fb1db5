//! Shared HTTP constants (headers, problem URIs).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const PROBLEM_INTERNAL: &str = "https://spyglass.dev/problems/internal";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://spyglass.dev/problems/bad-request";
pub(crate) const PROBLEM_CONFIG_INVALID: &str = "https://spyglass.dev/problems/config-invalid";
pub(crate) const PROBLEM_READ_ONLY: &str = "https://spyglass.dev/problems/read-only";
