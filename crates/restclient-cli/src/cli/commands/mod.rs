//! CLI command handlers.

mod request;
mod smoke;

pub use request::{run_request, Verb};
pub use smoke::run_smoke;

#[cfg(test)]
pub use smoke::{selected, JOB_NAMES};
