//! Priority job scheduler.
//!
//! A single dispatcher drains the store-backed queues (High strictly
//! before Low) and hands eligible jobs to a bounded worker pool. A job is
//! eligible once every dependency is Done; eligibility is re-evaluated on
//! every store commit. After a body returns, its deferred continuation
//! (if any) runs exactly once with the body's error and its follow-up job
//! ids are recorded on the job record, where `wait_for` picks them up.
//!
//! The `state not changed` sentinel is recognised here: it means the
//! stage had already run, the skip is treated as successful completion
//! and never surfaced.

use std::sync::Arc;

use tofuls_store::{EligibleJob, JobCtx, JobError, JobStore};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// Size of the worker pool. Workloads are I/O bound, so the default is
  /// on the order of the CPU count.
  pub workers: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
    }
  }
}

pub struct Scheduler {
  jobs: JobStore,
  config: SchedulerConfig,
}

impl Scheduler {
  pub fn new(jobs: JobStore, config: SchedulerConfig) -> Self {
    Self { jobs, config }
  }

  /// Spawns the dispatcher; it runs until the token fires.
  pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run(cancel))
  }

  async fn run(self, cancel: CancellationToken) {
    info!(workers = self.config.workers, "scheduler started");
    let semaphore = Arc::new(Semaphore::new(self.config.workers));
    let mut rx = self.jobs.subscribe();

    loop {
      // Hand out work while there are both permits and eligible jobs
      while let Ok(permit) = semaphore.clone().try_acquire_owned() {
        let Some(eligible) = self.jobs.next_eligible() else {
          drop(permit);
          break;
        };
        let jobs = self.jobs.clone();
        let worker_cancel = cancel.clone();
        tokio::spawn(async move {
          run_job(jobs, eligible, worker_cancel, permit).await;
        });
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        changed = rx.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
    }

    info!("scheduler stopped");
  }
}

async fn run_job(jobs: JobStore, eligible: EligibleJob, sched_cancel: CancellationToken, permit: OwnedSemaphorePermit) {
  let EligibleJob { id, job, cancel } = eligible;
  let ctx = JobCtx {
    cancel: cancel.clone(),
    ignore_state: job.ignore_state,
    document: job.document.clone(),
  };

  trace!(%id, dir = %job.dir, op = %job.op, "job starting");

  let result = tokio::select! {
    biased;
    _ = sched_cancel.cancelled() => Err(JobError::Cancelled),
    res = job.run(ctx.clone()) => res,
  };
  let body_err = result.err();

  match &body_err {
    None => trace!(%id, op = %job.op, "job body ok"),
    Some(err) if err.is_state_not_changed() => {
      trace!(%id, op = %job.op, "state unchanged, skipped")
    }
    Some(err) if err.is_cancelled() => debug!(%id, op = %job.op, "job cancelled"),
    Some(err) => warn!(%id, dir = %job.dir, op = %job.op, error = %err, "job failed"),
  }

  // The continuation runs exactly once, success or failure, and its ids
  // extend the waitset of anyone waiting on this job
  let (deferred_ids, defer_err) = match job.run_defer(ctx, body_err.clone()) {
    Some(fut) => fut.await,
    None => (Vec::new(), None),
  };
  if let Some(err) = &defer_err {
    warn!(%id, dir = %job.dir, op = %job.op, error = %err, "deferred continuation failed");
  }

  let final_err = match body_err {
    Some(err) if err.is_state_not_changed() => None,
    other => defer_err.or(other),
  };

  // Release the worker slot before completion is announced; the
  // announcement is what wakes the dispatcher, and it must be able to
  // claim this slot when it does
  drop(permit);
  jobs.finish(id, final_err, deferred_ids);
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };
  use std::time::Duration;

  use tofuls_core::{operation::OpType, path::DirHandle};
  use tofuls_store::{Job, Priority, StateStore};

  use super::*;

  fn start_scheduler(store: &StateStore, workers: usize) -> CancellationToken {
    let cancel = CancellationToken::new();
    Scheduler::new(store.jobs(), SchedulerConfig { workers }).start(cancel.clone());
    cancel
  }

  #[tokio::test]
  async fn runs_a_job_to_completion() {
    let (store, _rx) = StateStore::new();
    let cancel = start_scheduler(&store, 2);
    let dir = DirHandle::from_path("/mod");

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_job = ran.clone();
    let id = store.jobs().enqueue(Job::new(dir, OpType::ParseModuleConfiguration, move |_ctx| {
      let ran = ran_in_job.clone();
      async move {
        ran.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }
    }));

    store.jobs().wait_for(&[id], &CancellationToken::new()).await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    cancel.cancel();
  }

  #[tokio::test]
  async fn high_queue_overtakes_full_low_queue() {
    let (store, _rx) = StateStore::new();
    let cancel = start_scheduler(&store, 2);
    let dir = DirHandle::from_path("/mod");

    let low_done = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
      let low_done = low_done.clone();
      store
        .jobs()
        .enqueue(Job::new(dir.clone(), OpType::GetModuleDataFromRegistry, move |_ctx| {
          let low_done = low_done.clone();
          async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            low_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
          }
        })
        .with_priority(Priority::Low));
    }

    let low_done_at_high = Arc::new(AtomicUsize::new(usize::MAX));
    let observed = low_done_at_high.clone();
    let low_counter = low_done.clone();
    let high = store
      .jobs()
      .enqueue(Job::new(dir, OpType::ParseModuleConfiguration, move |_ctx| {
        let observed = observed.clone();
        let low_counter = low_counter.clone();
        async move {
          observed.store(low_counter.load(Ordering::SeqCst), Ordering::SeqCst);
          Ok(())
        }
      }));

    store.jobs().wait_for(&[high], &CancellationToken::new()).await.unwrap();
    // The dispatcher must not start new Low jobs while High is queued;
    // only the handful already in flight may complete first
    assert!(low_done_at_high.load(Ordering::SeqCst) < 50);
    cancel.cancel();
  }

  #[tokio::test]
  async fn wait_for_covers_deferred_continuation_jobs() {
    let (store, _rx) = StateStore::new();
    let cancel = start_scheduler(&store, 2);
    let dir = DirHandle::from_path("/mod");
    let jobs = store.jobs();

    let preload_ran = Arc::new(AtomicUsize::new(0));

    let j1 = jobs.enqueue(Job::new(dir.clone(), OpType::ParseModuleConfiguration, |_ctx| async {
      Ok(())
    }));

    let defer_jobs = jobs.clone();
    let defer_dir = dir.clone();
    let defer_flag = preload_ran.clone();
    let j2 = jobs.enqueue(
      Job::new(dir.clone(), OpType::LoadModuleMetadata, |_ctx| async { Ok(()) })
        .depends_on([j1])
        .with_defer(move |_ctx, _err| {
          let jobs = defer_jobs.clone();
          let dir = defer_dir.clone();
          let flag = defer_flag.clone();
          async move {
            let j3 = jobs.enqueue(Job::new(dir, OpType::PreloadEmbeddedSchema, move |_ctx| {
              let flag = flag.clone();
              async move {
                // Give the waiter a chance to observe j2 done first
                tokio::time::sleep(Duration::from_millis(5)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
              }
            }));
            (vec![j3], None)
          }
        }),
    );

    jobs.wait_for(&[j2], &CancellationToken::new()).await.unwrap();
    assert_eq!(preload_ran.load(Ordering::SeqCst), 1, "wait_for returned before the deferred job completed");
    cancel.cancel();
  }

  #[tokio::test]
  async fn state_not_changed_is_not_an_error() {
    let (store, _rx) = StateStore::new();
    let cancel = start_scheduler(&store, 1);
    let dir = DirHandle::from_path("/mod");

    let err_dir = dir.clone();
    let id = store.jobs().enqueue(Job::new(dir, OpType::LoadModuleMetadata, move |_ctx| {
      let dir = err_dir.clone();
      async move { Err(JobError::StateNotChanged { dir }) }
    }));

    store.jobs().wait_for(&[id], &CancellationToken::new()).await.unwrap();
    let snap = store.jobs().snapshot(id).unwrap();
    assert!(snap.error.is_none(), "idempotent skip must read as success");
    cancel.cancel();
  }

  #[tokio::test]
  async fn running_job_observes_directory_dequeue() {
    let (store, _rx) = StateStore::new();
    let cancel = start_scheduler(&store, 1);
    let dir = DirHandle::from_path("/mod");

    let id = store.jobs().enqueue(Job::new(dir.clone(), OpType::ParseModuleConfiguration, |ctx| async move {
      ctx.cancel.cancelled().await;
      Err(JobError::Cancelled)
    }));

    // Let the job start, then cancel everything for the directory
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.jobs().dequeue_jobs_for_dir(&dir);

    store.jobs().wait_for(&[id], &CancellationToken::new()).await.unwrap();
    let snap = store.jobs().snapshot(id).unwrap();
    assert!(snap.error.unwrap().is_cancelled());
    cancel.cancel();
  }
}
