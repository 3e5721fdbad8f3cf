//! A named unit of work bound to one destination host.

use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::host::{HostInfo, HostKey};
use crate::http::HttpConnection;

/// Future returned by a job body; borrows the job name, host and connection.
pub type JobFuture<'a> = LocalBoxFuture<'a, anyhow::Result<()>>;

type JobWork = Rc<dyn for<'a> Fn(&'a str, &'a HostInfo, &'a mut HttpConnection) -> JobFuture<'a>>;

/// Work queued on a [`JobRunner`](super::JobRunner).
///
/// The body is called once per attempt with the job name, the destination and
/// a connection that no other job is using. It may issue any number of
/// requests; every response body must be consumed or dropped before the
/// future finishes.
#[derive(Clone)]
pub struct Job {
    name: String,
    host: HostInfo,
    work: JobWork,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, host: HostInfo, work: F) -> Self
    where
        F: for<'a> Fn(&'a str, &'a HostInfo, &'a mut HttpConnection) -> JobFuture<'a> + 'static,
    {
        Self {
            name: name.into(),
            host,
            work: Rc::new(work),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn key(&self) -> HostKey {
        self.host.key()
    }

    /// Run one attempt of the body.
    pub(crate) fn attempt<'a>(&'a self, conn: &'a mut HttpConnection) -> JobFuture<'a> {
        (self.work)(&self.name, &self.host, conn)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
