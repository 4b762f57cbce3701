//! Queue of directories awaiting discovery by a walker.
//!
//! Each path moves through `Queued -> Walking -> Walked`; re-enqueueing a
//! walked path is allowed (workspace folders can come back), a queued or
//! walking path is not duplicated.

use std::{
  collections::{HashMap, VecDeque},
  sync::Arc,
};

use tofuls_core::path::DirHandle;
use tokio_util::sync::CancellationToken;

use crate::{Inner, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
  Queued,
  Walking,
  Walked,
}

#[derive(Default, Clone)]
pub(crate) struct WalkerTable {
  pub(crate) queue: VecDeque<DirHandle>,
  pub(crate) states: HashMap<DirHandle, WalkState>,
}

/// Facade over the walker-paths queue.
#[derive(Clone)]
pub struct WalkerPathStore {
  inner: Arc<Inner>,
}

impl WalkerPathStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  /// Adds a directory to the discovery queue (dedup against in-flight
  /// entries) and wakes any walker blocked on [`Self::next`].
  pub fn enqueue_dir(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      match tables.walker.states.get(dir) {
        Some(WalkState::Queued) | Some(WalkState::Walking) => return Ok(()),
        _ => {}
      }
      tables.walker.states.insert(dir.clone(), WalkState::Queued);
      tables.walker.queue.push_back(dir.clone());
      Ok(())
    })
  }

  /// Removes a directory from the queue (e.g. a workspace folder left).
  pub fn remove_dir(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.walker.queue.retain(|d| d != dir);
      tables.walker.states.remove(dir);
      Ok(())
    })
  }

  /// Awaits the next queued directory, marking it `Walking`. Returns
  /// `None` when the token fires.
  pub async fn next(&self, cancel: &CancellationToken) -> Option<DirHandle> {
    let mut rx = self.inner.subscribe();
    loop {
      // Read-only probe first; an empty pop must not commit (the version
      // bump would wake this very loop again)
      let popped = if self.inner.snapshot().walker.queue.is_empty() {
        None
      } else {
        self.inner.write_ok(|tables| {
          let dir = tables.walker.queue.pop_front()?;
          tables.walker.states.insert(dir.clone(), WalkState::Walking);
          Some(dir)
        })
      };
      if let Some(dir) = popped {
        return Some(dir);
      }
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return None,
        changed = rx.changed() => {
          if changed.is_err() {
            return None;
          }
        }
      }
    }
  }

  pub fn mark_walked(&self, dir: &DirHandle) {
    self.inner.write_ok(|tables| {
      tables.walker.states.insert(dir.clone(), WalkState::Walked);
    });
  }

  pub fn state(&self, dir: &DirHandle) -> Option<WalkState> {
    self.inner.snapshot().walker.states.get(dir).copied()
  }

  /// Test helper: waits until the directory has been fully walked.
  pub async fn wait_for_walked(&self, dir: &DirHandle, cancel: &CancellationToken) -> bool {
    let mut rx = self.inner.subscribe();
    loop {
      if self.state(dir) == Some(WalkState::Walked) {
        return true;
      }
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return false,
        changed = rx.changed() => {
          if changed.is_err() {
            return false;
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  #[tokio::test]
  async fn queue_dedups_inflight_entries() {
    let (store, _rx) = StateStore::new();
    let paths = store.walker_paths();
    let dir = DirHandle::from_path("/root");
    let cancel = CancellationToken::new();

    paths.enqueue_dir(&dir).unwrap();
    paths.enqueue_dir(&dir).unwrap();

    assert_eq!(paths.next(&cancel).await, Some(dir.clone()));
    assert_eq!(paths.state(&dir), Some(WalkState::Walking));

    // The duplicate enqueue was coalesced, the queue is now empty
    cancel.cancel();
    assert_eq!(paths.next(&cancel).await, None);
  }

  #[tokio::test]
  async fn walked_paths_can_be_requeued() {
    let (store, _rx) = StateStore::new();
    let paths = store.walker_paths();
    let dir = DirHandle::from_path("/root");
    let cancel = CancellationToken::new();

    paths.enqueue_dir(&dir).unwrap();
    paths.next(&cancel).await.unwrap();
    paths.mark_walked(&dir);

    paths.enqueue_dir(&dir).unwrap();
    assert_eq!(paths.next(&cancel).await, Some(dir));
  }
}
