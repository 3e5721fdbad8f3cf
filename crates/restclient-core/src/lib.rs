//! HTTP/1.1 client with pooled per-host connections and a cooperative job
//! scheduler.

pub mod config;
pub mod host;
pub mod http;
pub mod logging;
pub mod retry;
pub mod scheduler;
pub mod services;
pub mod source;
pub mod storage;

pub use config::RestClientConfig;
pub use host::{HostInfo, HostKey};
pub use http::{Body, Headers, HttpConnection, HttpError, Request, Response};
pub use scheduler::{Job, JobRunner, RunSummary, SchedulerError};
pub use services::Services;
