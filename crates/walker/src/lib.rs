//! Module directory discovery.
//!
//! A walker drains the store's walker-paths queue; each dequeued path is
//! walked as a whole subtree (the walker never re-enqueues into the
//! shared queue). Directories whose entries include a module file trigger
//! the discovery hook. Two independent instances run in a session: one
//! fed by workspace roots (closed directories) and one fed by document
//! open events.

use std::{
  path::PathBuf,
  sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use tofuls_core::{
  fsview::{FileSystem, FsError},
  path::DirHandle,
};
use tofuls_store::{JobId, WalkerPathStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Directory names that are never worth descending into.
const BUILTIN_IGNORED_DIRS: &[&str] = &[".git", ".idea", ".vscode", "node_modules", ".terragrunt-cache"];

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
  #[error("failed to list {dir}: {source}")]
  List {
    dir: DirHandle,
    #[source]
    source: FsError,
  },

  #[error("discovery hook failed for {dir}: {message}")]
  Discovery { dir: DirHandle, message: String },
}

/// Feature-layer hook invoked for every directory that contains at least
/// one module file.
#[async_trait]
pub trait ModuleDiscoverer: Send + Sync {
  /// `filenames` are the plain file entries of the directory. Returns ids
  /// of any jobs scheduled so the collector can expose them to waiters.
  async fn discover(&self, dir: &DirHandle, filenames: &[String]) -> Result<Vec<JobId>, String>;
}

/// Collects errors and job ids across one walker's lifetime. Tests and
/// the session layer use it to await or inspect discovery work.
#[derive(Default, Clone)]
pub struct WalkerCollector {
  inner: Arc<Mutex<CollectorInner>>,
}

#[derive(Default)]
struct CollectorInner {
  errors: Vec<WalkError>,
  job_ids: Vec<JobId>,
}

impl WalkerCollector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn collect_error(&self, error: WalkError) {
    self.inner.lock().expect("collector lock poisoned").errors.push(error);
  }

  pub fn collect_job_ids(&self, ids: &[JobId]) {
    self
      .inner
      .lock()
      .expect("collector lock poisoned")
      .job_ids
      .extend_from_slice(ids);
  }

  pub fn job_ids(&self) -> Vec<JobId> {
    self.inner.lock().expect("collector lock poisoned").job_ids.clone()
  }

  pub fn errors(&self) -> Vec<String> {
    self
      .inner
      .lock()
      .expect("collector lock poisoned")
      .errors
      .iter()
      .map(|e| e.to_string())
      .collect()
  }
}

#[derive(Default)]
struct IgnoreRules {
  paths: Vec<PathBuf>,
  names: Vec<String>,
}

impl IgnoreRules {
  fn skips_dir(&self, dir: &DirHandle, name: &str) -> bool {
    if BUILTIN_IGNORED_DIRS.contains(&name) || self.names.iter().any(|n| n == name) {
      return true;
    }
    self.paths.iter().any(|p| dir.path().starts_with(p))
  }
}

/// One walker instance over the shared walker-paths queue.
pub struct Walker {
  fs: Arc<dyn FileSystem>,
  paths: WalkerPathStore,
  discoverer: Arc<dyn ModuleDiscoverer>,
  collector: WalkerCollector,
  ignore: RwLock<IgnoreRules>,
  /// Label for logs: "closed" or "open".
  kind: &'static str,
}

impl Walker {
  pub fn new(
    kind: &'static str,
    fs: Arc<dyn FileSystem>,
    paths: WalkerPathStore,
    discoverer: Arc<dyn ModuleDiscoverer>,
    collector: WalkerCollector,
  ) -> Self {
    Self {
      fs,
      paths,
      discoverer,
      collector,
      ignore: RwLock::new(IgnoreRules::default()),
      kind,
    }
  }

  pub fn set_ignored_paths(&self, paths: Vec<PathBuf>) {
    self.ignore.write().expect("ignore lock poisoned").paths = paths;
  }

  pub fn set_ignored_directory_names(&self, names: Vec<String>) {
    self.ignore.write().expect("ignore lock poisoned").names = names;
  }

  /// Spawns the walking loop; safe to run concurrently with other
  /// instances over the same queue.
  pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
      info!(kind = self.kind, "walker started");
      while let Some(dir) = self.paths.next(&cancel).await {
        debug!(kind = self.kind, %dir, "walking");
        self.walk_subtree(dir.clone(), &cancel).await;
        self.paths.mark_walked(&dir);
      }
      info!(kind = self.kind, "walker stopped");
    })
  }

  /// Depth-first descent over one dequeued root.
  async fn walk_subtree(&self, root: DirHandle, cancel: &CancellationToken) {
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
      if cancel.is_cancelled() {
        return;
      }

      let entries = match self.fs.read_dir(dir.path(), cancel).await {
        Ok(entries) => entries,
        Err(FsError::Cancelled) => return,
        Err(source) => {
          warn!(kind = self.kind, %dir, error = %source, "failed to list directory");
          self.collector.collect_error(WalkError::List { dir, source });
          continue;
        }
      };

      let filenames: Vec<String> = entries.iter().filter(|e| !e.is_dir).map(|e| e.name.clone()).collect();
      if filenames.iter().any(|name| is_module_filename(name)) {
        match self.discoverer.discover(&dir, &filenames).await {
          Ok(ids) => self.collector.collect_job_ids(&ids),
          Err(message) => {
            warn!(kind = self.kind, %dir, error = %message, "discovery failed");
            self.collector.collect_error(WalkError::Discovery { dir: dir.clone(), message });
          }
        }
      }

      let ignore = self.ignore.read().expect("ignore lock poisoned");
      for entry in entries.iter().filter(|e| e.is_dir) {
        let child = dir.join(&entry.name);
        if ignore.skips_dir(&child, &entry.name) {
          continue;
        }
        pending.push(child);
      }
    }
  }
}

/// Whether a filename marks its directory as a module.
pub fn is_module_filename(name: &str) -> bool {
  if name.starts_with('.') || name.ends_with('~') {
    return false;
  }
  name.ends_with(".tf")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;
  use tofuls_core::fsview::MemFileSystem;
  use tofuls_store::StateStore;

  struct RecordingDiscoverer {
    seen: StdMutex<Vec<String>>,
  }

  #[async_trait]
  impl ModuleDiscoverer for RecordingDiscoverer {
    async fn discover(&self, dir: &DirHandle, _filenames: &[String]) -> Result<Vec<JobId>, String> {
      self.seen.lock().unwrap().push(dir.to_string());
      Ok(vec![])
    }
  }

  fn fixture_fs() -> MemFileSystem {
    let fs = MemFileSystem::new();
    fs.insert_file("/root/main.tf", b"provider \"github\" {}".to_vec());
    fs.insert_file("/root/sub/network.tf", b"variable \"cidr\" {}".to_vec());
    fs.insert_file("/root/docs/readme.md", b"# docs".to_vec());
    fs.insert_file("/root/.git/config", b"".to_vec());
    fs.insert_file("/root/node_modules/pkg/x.tf", b"".to_vec());
    fs
  }

  #[tokio::test]
  async fn discovers_module_directories_skipping_ignored() {
    let (store, _rx) = StateStore::new();
    let discoverer = Arc::new(RecordingDiscoverer {
      seen: StdMutex::new(vec![]),
    });
    let walker = Arc::new(Walker::new(
      "closed",
      Arc::new(fixture_fs()),
      store.walker_paths(),
      discoverer.clone(),
      WalkerCollector::new(),
    ));

    let cancel = CancellationToken::new();
    walker.clone().start(cancel.clone());

    let root = DirHandle::from_path("/root");
    store.walker_paths().enqueue_dir(&root).unwrap();
    assert!(store.walker_paths().wait_for_walked(&root, &CancellationToken::new()).await);

    let mut seen = discoverer.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["/root".to_string(), "/root/sub".to_string()]);
    cancel.cancel();
  }

  #[tokio::test]
  async fn custom_ignores_apply() {
    let (store, _rx) = StateStore::new();
    let discoverer = Arc::new(RecordingDiscoverer {
      seen: StdMutex::new(vec![]),
    });
    let walker = Arc::new(Walker::new(
      "closed",
      Arc::new(fixture_fs()),
      store.walker_paths(),
      discoverer.clone(),
      WalkerCollector::new(),
    ));
    walker.set_ignored_directory_names(vec!["sub".to_string()]);

    let cancel = CancellationToken::new();
    walker.clone().start(cancel.clone());

    let root = DirHandle::from_path("/root");
    store.walker_paths().enqueue_dir(&root).unwrap();
    assert!(store.walker_paths().wait_for_walked(&root, &CancellationToken::new()).await);

    assert_eq!(discoverer.seen.lock().unwrap().clone(), vec!["/root".to_string()]);
    cancel.cancel();
  }

  #[test]
  fn module_filename_detection() {
    assert!(is_module_filename("main.tf"));
    assert!(!is_module_filename("main.tf~"));
    assert!(!is_module_filename(".hidden.tf"));
    assert!(!is_module_filename("readme.md"));
  }
}
