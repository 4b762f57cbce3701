//! Job records and the queue the scheduler drains.
//!
//! The table keeps the two priority queues (as ordered id sets; ids are
//! issued monotonically so iteration order is FIFO), a by-directory index
//! and the dependency edges. Completion is broadcast through the store's
//! version channel, which lets `wait_for` re-check its (possibly growing)
//! waitset after every commit.

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
  future::Future,
  pin::Pin,
  sync::Arc,
};

use tofuls_core::{document::DocumentContext, operation::OpType, path::DirHandle};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Inner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "job-{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
  #[default]
  High,
  Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
  Queued,
  Running,
  Done,
}

/// Error surface of a job body.
///
/// `StateNotChanged` is the idempotent-skip sentinel: the scheduler treats
/// it as success and it is never surfaced to the editor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
  #[error("{dir}: state not changed")]
  StateNotChanged { dir: DirHandle },

  #[error("job cancelled")]
  Cancelled,

  #[error("{0}")]
  Other(String),
}

impl JobError {
  pub fn other(err: impl fmt::Display) -> Self {
    JobError::Other(err.to_string())
  }

  pub fn is_state_not_changed(&self) -> bool {
    matches!(self, JobError::StateNotChanged { .. })
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, JobError::Cancelled)
  }
}

impl From<crate::StoreError> for JobError {
  fn from(err: crate::StoreError) -> Self {
    match err {
      crate::StoreError::StateNotChanged { dir } => JobError::StateNotChanged { dir },
      other => JobError::Other(other.to_string()),
    }
  }
}

/// Context passed into a job body: the cancellation signal plus the
/// request flags threaded from the enqueue site.
#[derive(Clone)]
pub struct JobCtx {
  pub cancel: CancellationToken,
  pub ignore_state: bool,
  pub document: Option<DocumentContext>,
}

type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;
type BoxDeferFuture = Pin<Box<dyn Future<Output = (Vec<JobId>, Option<JobError>)> + Send>>;

type JobFn = Arc<dyn Fn(JobCtx) -> BoxJobFuture + Send + Sync>;
type DeferFn = Arc<dyn Fn(JobCtx, Option<JobError>) -> BoxDeferFuture + Send + Sync>;

/// A unit of work over one directory.
#[derive(Clone)]
pub struct Job {
  pub dir: DirHandle,
  pub op: OpType,
  pub priority: Priority,
  pub depends_on: Vec<JobId>,
  pub ignore_state: bool,
  pub document: Option<DocumentContext>,
  func: JobFn,
  defer: Option<DeferFn>,
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("dir", &self.dir)
      .field("op", &self.op)
      .field("priority", &self.priority)
      .field("depends_on", &self.depends_on)
      .field("ignore_state", &self.ignore_state)
      .field("has_defer", &self.defer.is_some())
      .finish()
  }
}

impl Job {
  pub fn new<F, Fut>(dir: DirHandle, op: OpType, func: F) -> Self
  where
    F: Fn(JobCtx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
  {
    Self {
      dir,
      op,
      priority: Priority::High,
      depends_on: Vec::new(),
      ignore_state: false,
      document: None,
      func: Arc::new(move |ctx| Box::pin(func(ctx))),
      defer: None,
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.priority = priority;
    self
  }

  pub fn depends_on(mut self, ids: impl IntoIterator<Item = JobId>) -> Self {
    self.depends_on.extend(ids);
    self
  }

  pub fn with_ignore_state(mut self, ignore_state: bool) -> Self {
    self.ignore_state = ignore_state;
    self
  }

  pub fn with_document(mut self, document: Option<DocumentContext>) -> Self {
    self.document = document;
    self
  }

  /// Attaches the deferred continuation: invoked exactly once after the
  /// body returns, with the body's error; yields follow-up job ids that
  /// extend the waitset of any `wait_for` naming this job.
  pub fn with_defer<F, Fut>(mut self, defer: F) -> Self
  where
    F: Fn(JobCtx, Option<JobError>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (Vec<JobId>, Option<JobError>)> + Send + 'static,
  {
    self.defer = Some(Arc::new(move |ctx, err| Box::pin(defer(ctx, err))));
    self
  }

  /// Invokes the body. Called by the scheduler's worker, exactly once.
  pub fn run(&self, ctx: JobCtx) -> BoxJobFuture {
    (self.func)(ctx)
  }

  /// Invokes the deferred continuation, if any, with the body's error.
  pub fn run_defer(&self, ctx: JobCtx, err: Option<JobError>) -> Option<BoxDeferFuture> {
    self.defer.as_ref().map(|defer| defer(ctx, err))
  }
}

#[derive(Clone)]
pub(crate) struct JobRecord {
  pub(crate) job: Job,
  pub(crate) state: JobState,
  pub(crate) error: Option<JobError>,
  pub(crate) deferred_ids: Vec<JobId>,
  pub(crate) cancel: CancellationToken,
}

/// Read-only view of one job record.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
  pub id: JobId,
  pub dir: DirHandle,
  pub op: OpType,
  pub state: JobState,
  pub error: Option<JobError>,
  pub deferred_ids: Vec<JobId>,
}

#[derive(Default, Clone)]
pub(crate) struct JobTable {
  pub(crate) records: HashMap<JobId, JobRecord>,
  pub(crate) by_dir: HashMap<DirHandle, BTreeSet<JobId>>,
  pub(crate) queued_high: BTreeSet<JobId>,
  pub(crate) queued_low: BTreeSet<JobId>,
}

impl JobTable {
  fn queue_mut(&mut self, priority: Priority) -> &mut BTreeSet<JobId> {
    match priority {
      Priority::High => &mut self.queued_high,
      Priority::Low => &mut self.queued_low,
    }
  }

  fn deps_done(&self, job: &Job) -> bool {
    job.depends_on.iter().all(|dep| {
      self
        .records
        .get(dep)
        .map(|r| r.state == JobState::Done)
        // An unknown dependency cannot complete; treat it as done so a
        // dequeued-then-removed dep does not wedge the queue
        .unwrap_or(true)
    })
  }

  /// Marks all queued jobs of a directory Done-with-cancel and signals
  /// running ones through their token.
  pub(crate) fn dequeue_for_dir(&mut self, dir: &DirHandle) {
    let Some(ids) = self.by_dir.get(dir).cloned() else { return };
    for id in ids {
      let Some(record) = self.records.get_mut(&id) else { continue };
      match record.state {
        JobState::Queued => {
          record.state = JobState::Done;
          record.error = Some(JobError::Cancelled);
          record.cancel.cancel();
          self.queued_high.remove(&id);
          self.queued_low.remove(&id);
        }
        JobState::Running => record.cancel.cancel(),
        JobState::Done => {}
      }
    }
  }
}

fn find_candidate(jobs: &JobTable) -> Option<JobId> {
  let queue = if !jobs.queued_high.is_empty() {
    &jobs.queued_high
  } else {
    &jobs.queued_low
  };
  queue
    .iter()
    .copied()
    .find(|id| jobs.records.get(id).is_some_and(|r| jobs.deps_done(&r.job)))
}

/// A job handed to the scheduler for execution.
pub struct EligibleJob {
  pub id: JobId,
  pub job: Job,
  pub cancel: CancellationToken,
}

/// Facade over the job table.
#[derive(Clone)]
pub struct JobStore {
  inner: Arc<Inner>,
}

impl JobStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  /// Adds a job to its priority queue and wakes the scheduler.
  pub fn enqueue(&self, job: Job) -> JobId {
    let id = JobId(self.inner.next_job_id());
    let dir = job.dir.clone();
    let op = job.op;
    self.inner.write_ok(|tables| {
      tables.jobs.records.insert(
        id,
        JobRecord {
          job: job.clone(),
          state: JobState::Queued,
          error: None,
          deferred_ids: Vec::new(),
          cancel: CancellationToken::new(),
        },
      );
      tables.jobs.by_dir.entry(dir.clone()).or_default().insert(id);
      tables.jobs.queue_mut(job.priority).insert(id);
    });
    trace!(%id, %dir, %op, "job enqueued");
    id
  }

  /// Pops the next runnable job, High queue strictly first: as long as
  /// any High job is queued, no Low job is handed out. Dependencies of
  /// High jobs are never Low (the pipeline only points the other way),
  /// so this cannot wedge.
  pub fn next_eligible(&self) -> Option<EligibleJob> {
    // Read-only probe first: an empty probe must not commit (a commit
    // bumps the version channel and would wake the dispatcher that just
    // called us, spinning the loop)
    if find_candidate(&self.inner.snapshot().jobs).is_none() {
      return None;
    }

    self.inner.write_ok(|tables| {
      let id = find_candidate(&tables.jobs)?;
      let record = tables.jobs.records.get_mut(&id).expect("queued job has a record");
      record.state = JobState::Running;
      let eligible = EligibleJob {
        id,
        job: record.job.clone(),
        cancel: record.cancel.clone(),
      };
      let priority = record.job.priority;
      tables.jobs.queue_mut(priority).remove(&id);
      Some(eligible)
    })
  }

  /// Records completion; wakes waiters and the scheduler.
  pub fn finish(&self, id: JobId, error: Option<JobError>, deferred_ids: Vec<JobId>) {
    self.inner.write_ok(|tables| {
      if let Some(record) = tables.jobs.records.get_mut(&id) {
        record.state = JobState::Done;
        record.error = error.clone();
        record.deferred_ids = deferred_ids.clone();
      }
    });
    trace!(%id, ?error, deferred = deferred_ids.len(), "job done");
  }

  pub fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
    let tables = self.inner.snapshot();
    tables.jobs.records.get(&id).map(|record| JobSnapshot {
      id,
      dir: record.job.dir.clone(),
      op: record.job.op,
      state: record.state,
      error: record.error.clone(),
      deferred_ids: record.deferred_ids.clone(),
    })
  }

  pub fn list_incomplete_for_dir(&self, dir: &DirHandle) -> Vec<JobId> {
    let tables = self.inner.snapshot();
    let Some(ids) = tables.jobs.by_dir.get(dir) else {
      return Vec::new();
    };
    ids
      .iter()
      .copied()
      .filter(|id| tables.jobs.records.get(id).is_some_and(|r| r.state != JobState::Done))
      .collect()
  }

  pub fn dequeue_jobs_for_dir(&self, dir: &DirHandle) {
    self.inner.write_ok(|tables| tables.jobs.dequeue_for_dir(dir));
  }

  /// Blocks until every named job is Done, including jobs produced by
  /// their deferred continuations, transitively. Returns early with
  /// `Cancelled` when the caller's token fires; the jobs keep running.
  pub async fn wait_for(&self, ids: &[JobId], cancel: &CancellationToken) -> Result<(), JobError> {
    let mut rx = self.inner.subscribe();
    let mut waitset: BTreeSet<JobId> = ids.iter().copied().collect();

    loop {
      {
        let tables = self.inner.snapshot();
        // Expand through deferred ids to a fixpoint, then check
        loop {
          let mut grew = false;
          for id in waitset.clone() {
            if let Some(record) = tables.jobs.records.get(&id)
              && record.state == JobState::Done
            {
              for deferred in &record.deferred_ids {
                grew |= waitset.insert(*deferred);
              }
            }
          }
          if !grew {
            break;
          }
        }
        let all_done = waitset.iter().all(|id| {
          tables
            .jobs
            .records
            .get(id)
            .map(|r| r.state == JobState::Done)
            .unwrap_or(true)
        });
        if all_done {
          return Ok(());
        }
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        changed = rx.changed() => {
          if changed.is_err() {
            // Store dropped; nothing will ever complete
            return Err(JobError::Cancelled);
          }
        }
      }
    }
  }

  /// Test helper: waits until the queue is fully drained.
  pub async fn wait_for_all(&self, cancel: &CancellationToken) -> Result<(), JobError> {
    let mut rx = self.inner.subscribe();
    loop {
      {
        let tables = self.inner.snapshot();
        let idle = tables.jobs.records.values().all(|r| r.state == JobState::Done);
        if idle {
          return Ok(());
        }
      }
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
        changed = rx.changed() => {
          if changed.is_err() {
            return Err(JobError::Cancelled);
          }
        }
      }
    }
  }

  /// Receiver that fires after every store commit; the scheduler uses it
  /// to re-evaluate eligibility.
  pub fn subscribe(&self) -> tokio::sync::watch::Receiver<u64> {
    self.inner.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  fn noop_job(dir: &DirHandle) -> Job {
    Job::new(dir.clone(), OpType::ParseModuleConfiguration, |_ctx| async { Ok(()) })
  }

  #[test]
  fn high_strictly_before_low() {
    let (store, _rx) = StateStore::new();
    let jobs = store.jobs();
    let dir = DirHandle::from_path("/mod");

    let low = jobs.enqueue(noop_job(&dir).with_priority(Priority::Low));
    let high = jobs.enqueue(noop_job(&dir));

    let first = jobs.next_eligible().unwrap();
    assert_eq!(first.id, high);
    jobs.finish(first.id, None, Vec::new());

    let second = jobs.next_eligible().unwrap();
    assert_eq!(second.id, low);
  }

  #[test]
  fn dependencies_gate_eligibility() {
    let (store, _rx) = StateStore::new();
    let jobs = store.jobs();
    let dir = DirHandle::from_path("/mod");

    let parse = jobs.enqueue(noop_job(&dir));
    let meta = jobs.enqueue(noop_job(&dir).depends_on([parse]));

    let first = jobs.next_eligible().unwrap();
    assert_eq!(first.id, parse);
    // meta is not eligible while parse is running
    assert!(jobs.next_eligible().is_none());

    jobs.finish(parse, None, Vec::new());
    let second = jobs.next_eligible().unwrap();
    assert_eq!(second.id, meta);
  }

  #[test]
  fn dequeue_cancels_queued_jobs() {
    let (store, _rx) = StateStore::new();
    let jobs = store.jobs();
    let dir = DirHandle::from_path("/mod");

    let id = jobs.enqueue(noop_job(&dir));
    jobs.dequeue_jobs_for_dir(&dir);

    let snap = jobs.snapshot(id).unwrap();
    assert_eq!(snap.state, JobState::Done);
    assert!(snap.error.unwrap().is_cancelled());
    assert!(jobs.next_eligible().is_none());
    assert!(jobs.list_incomplete_for_dir(&dir).is_empty());
  }

  #[tokio::test]
  async fn wait_for_extends_to_deferred_ids() {
    let (store, _rx) = StateStore::new();
    let jobs = store.jobs();
    let dir = DirHandle::from_path("/mod");
    let cancel = CancellationToken::new();

    let j1 = jobs.enqueue(noop_job(&dir));
    let j2 = jobs.enqueue(noop_job(&dir));

    // Simulate the scheduler: j1 completes producing deferred j2
    let waiter = {
      let jobs = jobs.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { jobs.wait_for(&[j1], &cancel).await })
    };

    jobs.next_eligible().unwrap();
    jobs.finish(j1, None, vec![j2]);
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    jobs.next_eligible().unwrap();
    jobs.finish(j2, None, Vec::new());
    waiter.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn wait_for_returns_early_on_cancel() {
    let (store, _rx) = StateStore::new();
    let jobs = store.jobs();
    let dir = DirHandle::from_path("/mod");
    let id = jobs.enqueue(noop_job(&dir));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = jobs.wait_for(&[id], &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
  }
}
