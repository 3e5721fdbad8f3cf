//! The run loop: dispatch pending jobs onto free host slots, run each attempt
//! on the local task set, apply the retry policy, and resume whenever new work
//! is queued.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};

use crate::config::RestClientConfig;
use crate::host::{HostInfo, HostKey, HostStats, HostStatsTable};
use crate::http::{HttpConnection, HttpError};
use crate::retry::{classify, ErrorKind, RetryDecision, RetryPolicy};
use crate::services::Services;

use super::guard::SlotGuard;
use super::job::Job;
use super::queue::{HostQueue, QueueState};
use super::SchedulerError;

/// Terminal failure of one job after its last attempt.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub name: String,
    pub host: HostKey,
    pub attempts: u32,
    pub kind: ErrorKind,
    /// HTTP status when the failure was a status error.
    pub code: Option<u16>,
    pub message: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job {} on {} failed after {} attempt(s) [{}]: {}",
            self.name, self.host, self.attempts, self.kind, self.message
        )
    }
}

/// Bookkeeping for a spawned job task, used to report it if the task panics.
struct Running {
    name: String,
    key: HostKey,
    attempts: Rc<Cell<u32>>,
}

/// What one `run()` call got done.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: Vec<JobFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed.len()
    }
}

#[derive(Default)]
struct State {
    queues: BTreeMap<HostKey, HostQueue>,
    stats: HostStatsTable,
}

pub(super) struct Inner {
    config: RestClientConfig,
    services: Arc<Services>,
    retry: Cell<RetryPolicy>,
    state: RefCell<State>,
    wake: Notify,
    looping: Cell<bool>,
}

impl Inner {
    fn queue_mut<'s>(&self, state: &'s mut State, host: &HostInfo) -> &'s mut HostQueue {
        let key = host.key();
        let limit = self.config.limit_for(&key);
        state
            .queues
            .entry(key)
            .or_insert_with(|| HostQueue::new(host.clone(), limit))
    }

    pub(super) fn release_slot(&self, key: &HostKey, conn: Option<HttpConnection>) {
        match self.state.try_borrow_mut() {
            Ok(mut state) => {
                if let Some(queue) = state.queues.get_mut(key) {
                    queue.release(conn);
                }
            }
            Err(_) => tracing::error!(host = %key, "slot released while queue state was borrowed"),
        }
        self.wake.notify_one();
    }
}

/// Clears the run-loop flag even when the `run` future is dropped early.
struct LoopFlag<'a>(&'a Cell<bool>);

impl Drop for LoopFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Cooperative per-host job scheduler.
///
/// Jobs are grouped by host key. Each host runs at most its configured number
/// of jobs at once, each on its own connection, dispatched in FIFO order.
/// Everything runs on the current thread; `run` and `start` must be called
/// inside a `tokio::task::LocalSet`. Clones share the same queues, so a job
/// can hold a clone and enqueue follow-up work.
#[derive(Clone)]
pub struct JobRunner {
    inner: Rc<Inner>,
}

impl JobRunner {
    pub fn new(config: RestClientConfig, services: Arc<Services>) -> Self {
        let retry = config.retry_policy();
        Self {
            inner: Rc::new(Inner {
                config,
                services,
                retry: Cell::new(retry),
                state: RefCell::new(State::default()),
                wake: Notify::new(),
                looping: Cell::new(false),
            }),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry.get()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.inner.retry.set(policy);
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.inner.services
    }

    /// Handle to the queue for `host`, created on first use.
    pub fn queue(&self, host: &HostInfo) -> HostQueueHandle {
        let mut state = self.inner.state.borrow_mut();
        self.inner.queue_mut(&mut state, host);
        HostQueueHandle {
            runner: self.clone(),
            key: host.key(),
        }
    }

    /// Append a job to its host's queue and wake the run loop.
    pub fn enqueue(&self, job: Job) {
        {
            let mut state = self.inner.state.borrow_mut();
            let queue = self.inner.queue_mut(&mut state, job.host());
            tracing::debug!(job = job.name(), host = %job.host(), pending = queue.pending() + 1, "queued");
            queue.push(job);
        }
        self.inner.wake.notify_one();
    }

    pub fn host_stats(&self, key: &HostKey) -> Option<HostStats> {
        self.inner.state.borrow().stats.get(key).cloned()
    }

    pub fn queue_state(&self, key: &HostKey) -> Option<QueueState> {
        self.inner.state.borrow().queues.get(key).map(HostQueue::state)
    }

    /// True when no host has pending or running jobs.
    pub fn is_idle(&self) -> bool {
        self.inner
            .state
            .borrow()
            .queues
            .values()
            .all(|q| q.state() == QueueState::Idle)
    }

    /// Close pooled connections that are waiting for work.
    pub fn close_idle(&self) {
        for queue in self.inner.state.borrow_mut().queues.values_mut() {
            queue.close_idle();
        }
    }

    /// Spawn [`run`](Self::run) on the current `LocalSet`.
    pub fn start(&self) -> JoinHandle<Result<RunSummary, SchedulerError>> {
        let runner = self.clone();
        tokio::task::spawn_local(async move { runner.run().await })
    }

    /// Pump every host queue until nothing is pending or running.
    ///
    /// Jobs queued while the loop runs, including from inside other jobs, are
    /// picked up before it returns. Calling `run` again after it returned
    /// processes anything queued since. A `run` issued while another is
    /// active returns an empty summary immediately.
    pub async fn run(&self) -> Result<RunSummary, SchedulerError> {
        if self.inner.looping.replace(true) {
            tracing::debug!("run loop already active");
            return Ok(RunSummary::default());
        }
        let _looping = LoopFlag(&self.inner.looping);
        self.run_loop().await
    }

    async fn run_loop(&self) -> Result<RunSummary, SchedulerError> {
        let mut summary = RunSummary::default();
        let mut tasks: JoinSet<Result<(), JobFailure>> = JoinSet::new();
        let mut running: HashMap<Id, Running> = HashMap::new();

        loop {
            self.dispatch(&mut tasks, &mut running);

            if tasks.is_empty() {
                if let Some(err) = self.stalled() {
                    tracing::error!("{err}");
                    return Err(err);
                }
                if self.is_idle() {
                    break;
                }
            }

            tokio::select! {
                Some(joined) = tasks.join_next_with_id() => match joined {
                    Ok((id, outcome)) => {
                        running.remove(&id);
                        match outcome {
                            Ok(()) => summary.completed += 1,
                            Err(failure) => summary.failed.push(failure),
                        }
                    }
                    Err(e) => match running.remove(&e.id()) {
                        Some(task) => summary.failed.push(self.task_failure(task, &e)),
                        None => tracing::error!(error = %e, "unknown job task ended"),
                    },
                },
                _ = self.inner.wake.notified() => {}
            }
        }

        tracing::info!(
            completed = summary.completed,
            failed = summary.failed.len(),
            "run loop drained"
        );
        Ok(summary)
    }

    /// Start every job that has a free slot, oldest first within each host.
    fn dispatch(
        &self,
        tasks: &mut JoinSet<Result<(), JobFailure>>,
        running: &mut HashMap<Id, Running>,
    ) {
        let mut launches = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            for (key, queue) in state.queues.iter_mut() {
                while let Some((job, conn)) = queue.take_next(&self.inner.services) {
                    tracing::debug!(
                        job = job.name(),
                        host = %key,
                        active = queue.active(),
                        limit = queue.limit(),
                        "dispatch"
                    );
                    launches.push((key.clone(), job, conn));
                }
            }
        }
        for (key, job, conn) in launches {
            let attempts = Rc::new(Cell::new(0));
            let task = Running {
                name: job.name().to_string(),
                key: key.clone(),
                attempts: Rc::clone(&attempts),
            };
            let guard = SlotGuard::new(Rc::clone(&self.inner), key, conn);
            let runner = self.clone();
            let handle =
                tasks.spawn_local(async move { runner.execute(job, guard, attempts).await });
            running.insert(handle.id(), task);
        }
    }

    /// A job task that panicked or was cancelled. Its slot has already been
    /// released by the guard; other jobs keep running.
    fn task_failure(&self, task: Running, err: &JoinError) -> JobFailure {
        self.inner.state.borrow_mut().stats.record_error(&task.key);
        let failure = JobFailure {
            name: task.name,
            host: task.key,
            attempts: task.attempts.get(),
            kind: ErrorKind::Other,
            code: None,
            message: err.to_string(),
        };
        tracing::error!(
            job = %failure.name,
            host = %failure.host,
            attempt = failure.attempts,
            "job task aborted: {}",
            failure.message
        );
        failure
    }

    fn stalled(&self) -> Option<SchedulerError> {
        let state = self.inner.state.borrow();
        state
            .queues
            .values()
            .find(|q| q.is_stalled())
            .map(|q| SchedulerError::Stalled {
                host: q.host().to_string(),
                pending: q.pending(),
            })
    }

    /// Run attempts of `job` until it succeeds or the retry policy gives up.
    async fn execute(
        &self,
        job: Job,
        mut guard: SlotGuard,
        attempts: Rc<Cell<u32>>,
    ) -> Result<(), JobFailure> {
        let key = job.key();
        let mut attempt = 1u32;
        loop {
            attempts.set(attempt);
            let Some(conn) = guard.conn_mut() else {
                return Err(JobFailure {
                    name: job.name().to_string(),
                    host: key,
                    attempts: attempt,
                    kind: ErrorKind::Other,
                    code: None,
                    message: "connection slot lost".to_string(),
                });
            };
            let connects_before = conn.connects();
            let result = job.attempt(conn).await;
            let opened = conn.connects() - connects_before;

            let err = match result {
                Ok(()) => {
                    let mut state = self.inner.state.borrow_mut();
                    state.stats.record_connection_opened(&key, opened);
                    state.stats.record_success(&key);
                    drop(state);
                    tracing::info!(job = job.name(), host = %key, attempt, "job completed");
                    return Ok(());
                }
                Err(e) => e,
            };

            let kind = classify(&err);
            let http_err = err.chain().find_map(|c| c.downcast_ref::<HttpError>());
            let fatal = http_err.is_some_and(HttpError::is_fatal_to_connection);
            let code = http_err.and_then(HttpError::code);
            if fatal {
                conn.close();
            }
            {
                let mut state = self.inner.state.borrow_mut();
                state.stats.record_connection_opened(&key, opened);
                state.stats.record_error(&key);
                if kind == ErrorKind::Throttled {
                    state.stats.record_throttled(&key);
                }
            }

            match self.inner.retry.get().decide(attempt, kind) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job = job.name(),
                        host = %key,
                        attempt,
                        %kind,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying: {err:#}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::NoRetry => {
                    let failure = JobFailure {
                        name: job.name().to_string(),
                        host: key,
                        attempts: attempt,
                        kind,
                        code,
                        message: format!("{err:#}"),
                    };
                    tracing::warn!(
                        job = %failure.name,
                        host = %failure.host,
                        attempt,
                        %kind,
                        code = ?failure.code,
                        "job failed: {}",
                        failure.message
                    );
                    return Err(failure);
                }
            }
        }
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("JobRunner")
            .field("hosts", &state.queues.len())
            .field("looping", &self.inner.looping.get())
            .finish_non_exhaustive()
    }
}

/// Handle to one host's queue.
#[derive(Clone)]
pub struct HostQueueHandle {
    runner: JobRunner,
    key: HostKey,
}

impl HostQueueHandle {
    pub fn key(&self) -> &HostKey {
        &self.key
    }

    /// Queue a job. A job for a different host goes to that host's queue, so a
    /// connection is only ever used for its own destination.
    pub fn push(&self, job: Job) {
        if job.key() != self.key {
            tracing::debug!(job = job.name(), queue = %self.key, "job routed to its own host queue");
        }
        self.runner.enqueue(job);
    }

    pub fn len(&self) -> usize {
        self.runner
            .inner
            .state
            .borrow()
            .queues
            .get(&self.key)
            .map(HostQueue::pending)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> QueueState {
        self.runner
            .queue_state(&self.key)
            .unwrap_or(QueueState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostOverride;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn runner(cfg: RestClientConfig) -> JobRunner {
        let services = Arc::new(Services::new(&cfg).unwrap());
        let runner = JobRunner::new(cfg, services);
        runner.set_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });
        runner
    }

    fn host(port: u16) -> HostInfo {
        HostInfo::parse(&format!("http://127.0.0.1:{port}")).unwrap()
    }

    #[derive(Default)]
    struct Tracker {
        started: RefCell<Vec<String>>,
        running: Cell<usize>,
        peak: Cell<usize>,
    }

    fn sleepy_job(name: &str, host: HostInfo, tracker: Rc<Tracker>) -> Job {
        Job::new(name, host, move |name, _, _| {
            let tracker = Rc::clone(&tracker);
            Box::pin(async move {
                tracker.started.borrow_mut().push(name.to_string());
                tracker.running.set(tracker.running.get() + 1);
                tracker.peak.set(tracker.peak.get().max(tracker.running.get()));
                tokio::time::sleep(Duration::from_millis(5)).await;
                tracker.running.set(tracker.running.get() - 1);
                anyhow::Ok(())
            })
        })
    }

    #[tokio::test]
    async fn runs_fifo_within_the_host_limit() {
        LocalSet::new()
            .run_until(async {
                let cfg = RestClientConfig {
                    max_connections_per_host: 2,
                    ..RestClientConfig::default()
                };
                let runner = runner(cfg);
                let tracker = Rc::new(Tracker::default());
                let queue = runner.queue(&host(1));
                for i in 0..6 {
                    queue.push(sleepy_job(&format!("job-{i}"), host(1), Rc::clone(&tracker)));
                }
                assert_eq!(queue.len(), 6);

                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 6);
                assert!(summary.is_success());
                assert_eq!(tracker.peak.get(), 2);
                let expected: Vec<String> = (0..6).map(|i| format!("job-{i}")).collect();
                assert_eq!(*tracker.started.borrow(), expected);
                assert!(runner.is_idle());
                assert_eq!(queue.state(), QueueState::Idle);
            })
            .await;
    }

    #[tokio::test]
    async fn hosts_do_not_share_capacity() {
        LocalSet::new()
            .run_until(async {
                let cfg = RestClientConfig {
                    max_connections_per_host: 1,
                    ..RestClientConfig::default()
                };
                let runner = runner(cfg);
                let tracker = Rc::new(Tracker::default());
                for port in [1, 2, 3] {
                    runner.enqueue(sleepy_job(&format!("h{port}"), host(port), Rc::clone(&tracker)));
                }
                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 3);
                assert_eq!(tracker.peak.get(), 3);
            })
            .await;
    }

    #[tokio::test]
    async fn jobs_enqueued_by_jobs_are_run() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                let tracker = Rc::new(Tracker::default());
                let spawner = runner.clone();
                let follow_tracker = Rc::clone(&tracker);
                runner.enqueue(Job::new("login", host(1), move |_, host, _| {
                    let spawner = spawner.clone();
                    let tracker = Rc::clone(&follow_tracker);
                    let host = host.clone();
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        spawner.enqueue(sleepy_job("follow-up", host, tracker));
                        anyhow::Ok(())
                    })
                }));

                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 2);
                assert_eq!(*tracker.started.borrow(), vec!["follow-up".to_string()]);

                runner.enqueue(sleepy_job("later", host(1), Rc::clone(&tracker)));
                assert!(!runner.is_idle());
                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn zero_limit_is_reported_as_stalled() {
        LocalSet::new()
            .run_until(async {
                let mut cfg = RestClientConfig::default();
                cfg.hosts
                    .insert("127.0.0.1".to_string(), HostOverride { max_connections: 0 });
                let runner = runner(cfg);
                let tracker = Rc::new(Tracker::default());
                runner.enqueue(sleepy_job("stuck", host(1), tracker));
                match runner.run().await {
                    Err(SchedulerError::Stalled { pending, .. }) => assert_eq!(pending, 1),
                    other => panic!("expected stall, got {other:?}"),
                }
            })
            .await;
    }

    #[tokio::test]
    async fn throttled_jobs_are_retried() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                let calls = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&calls);
                runner.enqueue(Job::new("flaky", host(1), move |_, _, _| {
                    let counter = Rc::clone(&counter);
                    Box::pin(async move {
                        counter.set(counter.get() + 1);
                        if counter.get() < 3 {
                            return Err(anyhow::Error::from(HttpError::status(503)));
                        }
                        anyhow::Ok(())
                    })
                }));
                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 1);
                assert_eq!(calls.get(), 3);

                let stats = runner.host_stats(&host(1).key()).unwrap();
                assert_eq!(stats.throttled_events, 2);
                assert_eq!(stats.error_events, 2);
                assert_eq!(stats.success_events, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                let calls = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&calls);
                runner.enqueue(Job::new("missing", host(1), move |_, _, _| {
                    let counter = Rc::clone(&counter);
                    Box::pin(async move {
                        counter.set(counter.get() + 1);
                        Err::<(), _>(anyhow::Error::from(HttpError::status(404)))
                    })
                }));
                runner.enqueue(sleepy_job("fine", host(1), Rc::new(Tracker::default())));

                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 1);
                assert_eq!(calls.get(), 1);
                let failure = &summary.failed[0];
                assert_eq!(failure.name, "missing");
                assert_eq!(failure.code, Some(404));
                assert_eq!(failure.attempts, 1);
                assert_eq!(failure.kind, ErrorKind::Status(404));
            })
            .await;
    }

    #[tokio::test]
    async fn throttled_failure_keeps_status_code() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                runner.enqueue(Job::new("busy", host(1), |_, _, _| {
                    Box::pin(async { Err::<(), _>(anyhow::Error::from(HttpError::status(503))) })
                }));
                let summary = runner.run().await.unwrap();
                let failure = &summary.failed[0];
                assert_eq!(failure.kind, ErrorKind::Throttled);
                assert_eq!(failure.code, Some(503));
                assert_eq!(failure.attempts, 3);
            })
            .await;
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_other_hosts() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                let tracker = Rc::new(Tracker::default());
                runner.enqueue(Job::new("slow", host(2), |_, _, _| {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        anyhow::Ok(())
                    })
                }));
                runner.enqueue(Job::new("buggy", host(1), |name, _, _| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        if name == "buggy" {
                            panic!("job bug");
                        }
                        anyhow::Ok(())
                    })
                }));

                let summary = runner.run().await.unwrap();
                assert_eq!(summary.completed, 1);
                assert_eq!(summary.failed.len(), 1);
                let failure = &summary.failed[0];
                assert_eq!(failure.name, "buggy");
                assert_eq!(failure.host, host(1).key());
                assert_eq!(failure.kind, ErrorKind::Other);
                assert_eq!(failure.attempts, 1);
                assert!(failure.message.contains("job bug"), "{}", failure.message);

                // The slot came back, so the host still takes work.
                assert_eq!(runner.queue_state(&host(1).key()), Some(QueueState::Idle));
                runner.enqueue(sleepy_job("after", host(1), Rc::clone(&tracker)));
                assert_eq!(runner.run().await.unwrap().completed, 1);
            })
            .await;
    }

    #[tokio::test]
    async fn nested_run_is_a_no_op() {
        LocalSet::new()
            .run_until(async {
                let runner = runner(RestClientConfig::default());
                let inner_runner = runner.clone();
                let nested = Rc::new(Cell::new(None));
                let seen = Rc::clone(&nested);
                runner.enqueue(Job::new("outer", host(1), move |_, _, _| {
                    let inner_runner = inner_runner.clone();
                    let seen = Rc::clone(&seen);
                    Box::pin(async move {
                        let summary = inner_runner.run().await?;
                        seen.set(Some(summary.total()));
                        anyhow::Ok(())
                    })
                }));
                let handle = runner.start();
                let summary = handle.await.unwrap().unwrap();
                assert_eq!(summary.completed, 1);
                assert_eq!(nested.get(), Some(0));
            })
            .await;
    }
}
