//! Per-host FIFO of pending jobs plus its pool of connections.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::host::HostInfo;
use crate::http::HttpConnection;
use crate::services::Services;

use super::job::Job;

/// Observable state of one host queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing pending and nothing running.
    Idle,
    /// Below the connection limit with work pending or running.
    Dispatching,
    /// Every connection slot is taken; new jobs wait.
    Saturated,
}

pub(crate) struct HostQueue {
    host: HostInfo,
    limit: usize,
    pending: VecDeque<Job>,
    /// Open connections waiting for the next job.
    idle: Vec<HttpConnection>,
    /// Slots held by running jobs.
    active: usize,
}

impl HostQueue {
    pub(crate) fn new(host: HostInfo, limit: usize) -> Self {
        Self {
            host,
            limit,
            pending: VecDeque::new(),
            idle: Vec::new(),
            active: 0,
        }
    }

    pub(crate) fn host(&self) -> &HostInfo {
        &self.host
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.pending.push_back(job);
    }

    pub(crate) fn state(&self) -> QueueState {
        if self.active == 0 && self.pending.is_empty() {
            QueueState::Idle
        } else if self.active >= self.limit {
            QueueState::Saturated
        } else {
            QueueState::Dispatching
        }
    }

    /// Pending work that can never start: no slots at all and none running.
    pub(crate) fn is_stalled(&self) -> bool {
        self.limit == 0 && self.active == 0 && !self.pending.is_empty()
    }

    /// Claim a slot for the oldest pending job, with an idle connection if one
    /// is available or a fresh unconnected one otherwise.
    pub(crate) fn take_next(&mut self, services: &Arc<Services>) -> Option<(Job, HttpConnection)> {
        if self.active >= self.limit {
            return None;
        }
        let job = self.pending.pop_front()?;
        self.active += 1;
        let conn = self
            .idle
            .pop()
            .unwrap_or_else(|| HttpConnection::new(self.host.clone(), Arc::clone(services)));
        Some((job, conn))
    }

    /// Free a slot. Open connections go back to the pool for the next job.
    pub(crate) fn release(&mut self, conn: Option<HttpConnection>) {
        self.active = self.active.saturating_sub(1);
        if let Some(conn) = conn {
            if conn.is_open() && self.idle.len() < self.limit {
                self.idle.push(conn);
            }
        }
    }

    /// Close and drop every idle connection.
    pub(crate) fn close_idle(&mut self) {
        for mut conn in self.idle.drain(..) {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestClientConfig;

    fn job(name: &str, host: &HostInfo) -> Job {
        Job::new(name, host.clone(), |_, _, _| Box::pin(async { anyhow::Ok(()) }))
    }

    fn services() -> Arc<Services> {
        Arc::new(Services::new(&RestClientConfig::default()).unwrap())
    }

    #[test]
    fn fifo_dispatch_up_to_limit() {
        let host = HostInfo::parse("http://127.0.0.1:1").unwrap();
        let services = services();
        let mut q = HostQueue::new(host.clone(), 2);
        assert_eq!(q.state(), QueueState::Idle);
        for name in ["a", "b", "c"] {
            q.push(job(name, &host));
        }
        assert_eq!(q.state(), QueueState::Dispatching);

        let (first, _c1) = q.take_next(&services).unwrap();
        let (second, c2) = q.take_next(&services).unwrap();
        assert_eq!(first.name(), "a");
        assert_eq!(second.name(), "b");
        assert!(q.take_next(&services).is_none());
        assert_eq!(q.state(), QueueState::Saturated);
        assert_eq!(q.active(), 2);

        q.release(Some(c2));
        assert_eq!(q.state(), QueueState::Dispatching);
        let (third, _c3) = q.take_next(&services).unwrap();
        assert_eq!(third.name(), "c");
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn zero_limit_with_work_is_stalled() {
        let host = HostInfo::parse("http://127.0.0.1:1").unwrap();
        let mut q = HostQueue::new(host.clone(), 0);
        assert!(!q.is_stalled());
        q.push(job("never", &host));
        assert!(q.is_stalled());
        assert!(q.take_next(&services()).is_none());
    }
}
