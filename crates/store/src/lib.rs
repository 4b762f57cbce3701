//! Transactional, multi-indexed in-memory state store.
//!
//! The store is the single source of mutable truth for the server. All
//! tables live behind one copy-on-write snapshot: readers grab an `Arc`
//! to the current snapshot and never block writers or observe uncommitted
//! state; writers are serialized, clone the tables, mutate the clone and
//! swap it in atomically. An aborted write (error return) leaves no trace.
//!
//! Sub-stores ([`ModuleStore`], [`DocumentStore`], [`JobStore`], ...) are
//! cheap handles over the shared snapshot machinery, one per table.

mod documents;
mod jobs;
mod modules;
mod overlay;
mod registry;
mod roots;
mod schemas;
mod walker_paths;

use std::sync::{
  Arc, Mutex, RwLock,
  atomic::{AtomicU64, Ordering},
};

use tofuls_core::path::DirHandle;
use tokio::sync::{mpsc, watch};

pub use documents::DocumentStore;
pub use jobs::{EligibleJob, Job, JobCtx, JobError, JobId, JobSnapshot, JobState, JobStore, Priority};
pub use modules::{ModuleRecord, ModuleStage, ModuleStore};
pub use overlay::DocumentOverlayFs;
pub use registry::{RegistryInput, RegistryModuleData, RegistryModuleRecord, RegistryOutput, RegistryStore};
pub use roots::{InstalledManifest, InstalledModule, RootRecord, RootStore};
pub use schemas::{ProviderSchemaRecord, ProviderSchemaStore, SchemaSource};
pub use walker_paths::{WalkState, WalkerPathStore};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
  #[error("module not found for {0}")]
  ModuleNotFound(DirHandle),

  #[error("{0}: already exists")]
  AlreadyExists(DirHandle),

  #[error("document not found: {0}")]
  DocumentNotFound(String),

  #[error("{dir}: state not changed")]
  StateNotChanged { dir: DirHandle },

  #[error("document edit failed: {0}")]
  Document(String),
}

impl StoreError {
  pub fn is_already_exists(&self) -> bool {
    matches!(self, StoreError::AlreadyExists(_))
  }
}

/// A table mutation notification, consumed by the diagnostics publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
  pub dir: DirHandle,
}

#[derive(Default, Clone)]
pub(crate) struct Tables {
  pub(crate) modules: modules::ModuleTable,
  pub(crate) documents: documents::DocumentTable,
  pub(crate) jobs: jobs::JobTable,
  pub(crate) roots: roots::RootTable,
  pub(crate) schemas: schemas::SchemaTable,
  pub(crate) registry: registry::RegistryTable,
  pub(crate) walker: walker_paths::WalkerTable,
}

pub(crate) struct Inner {
  tables: RwLock<Arc<Tables>>,
  write_gate: Mutex<()>,
  /// Bumped on every committed write; subscribers use it to re-check
  /// whatever condition they are waiting for.
  version: watch::Sender<u64>,
  changes: mpsc::UnboundedSender<ChangeEvent>,
  job_seq: AtomicU64,
}

impl Inner {
  pub(crate) fn snapshot(&self) -> Arc<Tables> {
    self.tables.read().expect("state store lock poisoned").clone()
  }

  /// Runs a write transaction. The closure mutates a private clone of the
  /// tables; an `Err` return aborts the transaction with no side effects.
  pub(crate) fn write<R, E>(&self, f: impl FnOnce(&mut Tables) -> Result<R, E>) -> Result<R, E> {
    let _gate = self.write_gate.lock().expect("state store write gate poisoned");
    let mut next = (*self.snapshot()).clone();
    let result = f(&mut next)?;
    *self.tables.write().expect("state store lock poisoned") = Arc::new(next);
    self.version.send_modify(|v| *v += 1);
    Ok(result)
  }

  /// Write transaction that cannot abort.
  pub(crate) fn write_ok<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
    let result: Result<R, std::convert::Infallible> = self.write(|tables| Ok(f(tables)));
    match result {
      Ok(value) => value,
    }
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
    self.version.subscribe()
  }

  pub(crate) fn notify_change(&self, dir: DirHandle) {
    // The receiver being gone just means nobody publishes diagnostics
    let _ = self.changes.send(ChangeEvent { dir });
  }

  pub(crate) fn next_job_id(&self) -> u64 {
    self.job_seq.fetch_add(1, Ordering::Relaxed) + 1
  }
}

/// Handle to the whole store; clones share the same data.
#[derive(Clone)]
pub struct StateStore {
  inner: Arc<Inner>,
}

impl StateStore {
  /// Creates an empty store and the receiver for change notifications.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let (version_tx, _) = watch::channel(0);
    let store = Self {
      inner: Arc::new(Inner {
        tables: RwLock::new(Arc::new(Tables::default())),
        write_gate: Mutex::new(()),
        version: version_tx,
        changes: changes_tx,
        job_seq: AtomicU64::new(0),
      }),
    };
    (store, changes_rx)
  }

  pub fn modules(&self) -> ModuleStore {
    ModuleStore::new(self.inner.clone())
  }

  pub fn documents(&self) -> DocumentStore {
    DocumentStore::new(self.inner.clone())
  }

  pub fn jobs(&self) -> JobStore {
    JobStore::new(self.inner.clone())
  }

  pub fn roots(&self) -> RootStore {
    RootStore::new(self.inner.clone())
  }

  pub fn provider_schemas(&self) -> ProviderSchemaStore {
    ProviderSchemaStore::new(self.inner.clone())
  }

  pub fn registry_modules(&self) -> RegistryStore {
    RegistryStore::new(self.inner.clone())
  }

  pub fn walker_paths(&self) -> WalkerPathStore {
    WalkerPathStore::new(self.inner.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_isolation_across_writes() {
    let (store, _rx) = StateStore::new();
    let modules = store.modules();
    let dir = DirHandle::from_path("/mod");
    modules.add(&dir).unwrap();

    // A snapshot taken before a write keeps observing the old state
    let before = store.inner.snapshot();
    modules.remove(&dir).unwrap();
    assert!(before.modules.records.contains_key(&dir));
    assert!(!store.inner.snapshot().modules.records.contains_key(&dir));
  }

  #[test]
  fn aborted_write_leaves_no_trace() {
    let (store, _rx) = StateStore::new();
    let dir = DirHandle::from_path("/mod");
    store.modules().add(&dir).unwrap();

    let result: Result<(), StoreError> = store.inner.write(|tables| {
      tables.modules.records.clear();
      Err(StoreError::ModuleNotFound(dir.clone()))
    });
    assert!(result.is_err());
    assert!(store.inner.snapshot().modules.records.contains_key(&dir));
  }
}
