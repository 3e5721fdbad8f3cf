//! Per-host job scheduler.
//!
//! Jobs are queued per destination host and run on the current thread's
//! `LocalSet`. Each host has a connection limit; a job holds one connection
//! slot for the whole of its run, including retries, and the slot's
//! connection is reused by the next job for that host.

mod guard;
mod job;
mod queue;
mod runner;

pub use job::{Job, JobFuture};
pub use queue::QueueState;
pub use runner::{HostQueueHandle, JobFailure, JobRunner, RunSummary};

/// Errors that stop the run loop itself (as opposed to individual jobs).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Work is pending on a host that has no connection slots, so it can
    /// never run.
    #[error("host {host} has {pending} pending job(s) but a connection limit of 0")]
    Stalled { host: String, pending: usize },
}
