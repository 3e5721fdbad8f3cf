//! RAII guard that frees a host slot when a job task ends.

use std::rc::Rc;

use crate::host::HostKey;
use crate::http::HttpConnection;

use super::runner::Inner;

/// Holds one connection slot of a host queue. Dropping it (job finished,
/// failed, panicked or was aborted) returns the connection to the pool and
/// wakes the run loop.
pub(super) struct SlotGuard {
    inner: Rc<Inner>,
    key: HostKey,
    conn: Option<HttpConnection>,
}

impl SlotGuard {
    pub(super) fn new(inner: Rc<Inner>, key: HostKey, conn: HttpConnection) -> Self {
        Self {
            inner,
            key,
            conn: Some(conn),
        }
    }

    pub(super) fn conn_mut(&mut self) -> Option<&mut HttpConnection> {
        self.conn.as_mut()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.release_slot(&self.key, self.conn.take());
    }
}
