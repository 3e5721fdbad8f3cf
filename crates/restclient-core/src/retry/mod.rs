//! Retry and backoff policy.
//!
//! This module encapsulates error classification (timeouts, throttling,
//! connection and protocol failures) and exponential backoff decisions so
//! that the scheduler and the CLI share a consistent policy.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_http_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
