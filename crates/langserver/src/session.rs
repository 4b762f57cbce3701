//! Session wiring: one instance per editor connection.
//!
//! Owns the store, the scheduler, both walkers and the feature layer,
//! and carries the per-session configuration decoded at initialize time.

use std::{
  path::PathBuf,
  sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, Ordering},
  },
};

use async_trait::async_trait;
use tofuls_core::{
  document::{DocumentContext, TextChange},
  fsview::FileSystem,
  path::{DirHandle, DocHandle},
  settings::Options,
};
use tofuls_scheduler::{Scheduler, SchedulerConfig};
use tofuls_store::{ChangeEvent, DocumentOverlayFs, JobId, StateStore, StoreError};
use tofuls_walker::{ModuleDiscoverer, Walker, WalkerCollector};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
  decoder::Decoder,
  features::{modules::ModulesFeature, rootmodules::RootModulesFeature},
  schemas::BundledSchemas,
};

/// Experimental capabilities negotiated with the client.
#[derive(Debug, Clone, Default)]
pub struct ExperimentalCaps {
  pub show_references_command: Option<String>,
  pub refresh_module_providers: bool,
  pub refresh_module_calls: bool,
  pub refresh_tool_version: bool,
}

pub struct Session {
  pub store: StateStore,
  /// The document-overlay view: open-buffer text shadows disk. Every
  /// read in the session (pipeline jobs, walkers, request fallbacks)
  /// goes through this, so unsaved edits are always observed.
  pub fs: Arc<dyn FileSystem>,
  pub decoder: Decoder,
  pub modules: Arc<ModulesFeature>,
  pub roots: Arc<RootModulesFeature>,
  pub collector: WalkerCollector,
  pub cancel: CancellationToken,

  closed_walker: Arc<Walker>,
  open_walker: Arc<Walker>,
  walkers_started: AtomicBool,

  options: RwLock<Options>,
  experimental: RwLock<ExperimentalCaps>,
  root_dir: RwLock<Option<DirHandle>>,
  pub single_file_mode: AtomicBool,
  /// Warnings gathered during initialize, flushed once the client is
  /// ready for notifications.
  pending_warnings: Mutex<Vec<String>>,
}

impl Session {
  pub fn new(
    fs: Arc<dyn FileSystem>,
    bundled_schemas: BundledSchemas,
    registry: tofuls_registry::Client,
  ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (store, changes_rx) = StateStore::new();
    let cancel = CancellationToken::new();

    // Everything below reads through the overlay so open buffers shadow
    // whatever is on disk
    let fs: Arc<dyn FileSystem> = Arc::new(DocumentOverlayFs::new(fs, store.documents()));

    let roots = Arc::new(RootModulesFeature::new(store.clone(), fs.clone()));
    let modules = Arc::new(ModulesFeature::new(
      store.clone(),
      fs.clone(),
      bundled_schemas,
      registry,
      roots.clone(),
    ));

    Scheduler::new(store.jobs(), SchedulerConfig::default()).start(cancel.clone());

    let collector = WalkerCollector::new();
    let discoverer: Arc<dyn ModuleDiscoverer> = Arc::new(SessionDiscoverer {
      modules: modules.clone(),
      roots: roots.clone(),
      cancel: cancel.clone(),
    });
    let closed_walker = Arc::new(Walker::new(
      "closed",
      fs.clone(),
      store.walker_paths(),
      discoverer.clone(),
      collector.clone(),
    ));
    let open_walker = Arc::new(Walker::new(
      "open",
      fs.clone(),
      store.walker_paths(),
      discoverer,
      collector.clone(),
    ));

    let session = Arc::new(Self {
      decoder: Decoder::new(store.clone()),
      store,
      fs,
      modules,
      roots,
      collector,
      cancel,
      closed_walker,
      open_walker,
      walkers_started: AtomicBool::new(false),
      options: RwLock::new(Options::default()),
      experimental: RwLock::new(ExperimentalCaps::default()),
      root_dir: RwLock::new(None),
      single_file_mode: AtomicBool::new(false),
      pending_warnings: Mutex::new(Vec::new()),
    });
    (session, changes_rx)
  }

  /// Applies decoded initialization options to the feature layer and
  /// walkers.
  pub fn configure(&self, options: Options, root: Option<&DirHandle>) {
    self
      .modules
      .set_enhanced_validation(options.validation.enable_enhanced_validation);

    let mut ignored_paths = Vec::new();
    if let Some(root) = root {
      for raw in &options.indexing.ignore_paths {
        match tofuls_core::settings::resolve_path(root.path(), raw) {
          Ok(path) => ignored_paths.push(path),
          Err(err) => self.push_warning(format!("Unable to ignore path {raw:?}: {err}")),
        }
      }
    } else {
      ignored_paths.extend(options.indexing.ignore_paths.iter().map(PathBuf::from));
    }

    for walker in [&self.closed_walker, &self.open_walker] {
      walker.set_ignored_paths(ignored_paths.clone());
      walker.set_ignored_directory_names(options.indexing.ignore_directory_names.clone());
    }

    *self.root_dir.write().expect("options lock poisoned") = root.cloned();
    *self.options.write().expect("options lock poisoned") = options;
  }

  pub fn options(&self) -> Options {
    self.options.read().expect("options lock poisoned").clone()
  }

  pub fn command_prefix(&self) -> String {
    self.options().command_prefix
  }

  pub fn set_experimental(&self, caps: ExperimentalCaps) {
    *self.experimental.write().expect("experimental lock poisoned") = caps;
  }

  pub fn experimental(&self) -> ExperimentalCaps {
    self.experimental.read().expect("experimental lock poisoned").clone()
  }

  pub fn root_dir(&self) -> Option<DirHandle> {
    self.root_dir.read().expect("options lock poisoned").clone()
  }

  pub fn push_warning(&self, message: String) {
    self.pending_warnings.lock().expect("warnings lock poisoned").push(message);
  }

  pub fn take_warnings(&self) -> Vec<String> {
    std::mem::take(&mut *self.pending_warnings.lock().expect("warnings lock poisoned"))
  }

  /// Starts both walkers; further calls are no-ops.
  pub fn start_walkers(&self) {
    if self.walkers_started.swap(true, Ordering::SeqCst) {
      return;
    }
    self.closed_walker.clone().start(self.cancel.clone());
    self.open_walker.clone().start(self.cancel.clone());
  }

  pub fn enqueue_workspace_dir(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.store.walker_paths().enqueue_dir(dir)
  }

  pub fn remove_workspace_dir(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.store.walker_paths().remove_dir(dir)
  }

  // ==========================================================================
  // Document lifecycle
  // ==========================================================================

  pub async fn did_open_document(
    &self,
    handle: DocHandle,
    language_id: &str,
    version: i32,
    text: String,
  ) -> Result<Vec<JobId>, StoreError> {
    self.store.documents().open(handle.clone(), language_id, version, text)?;

    // Open documents also seed discovery so sibling modules get indexed
    if let Err(err) = self.enqueue_workspace_dir(&handle.dir) {
      warn!(dir = %handle.dir, error = %err, "failed to enqueue opened dir for walking");
    }

    let document = DocumentContext {
      method: "textDocument/didOpen".to_string(),
      language_id: language_id.to_string(),
      filename: handle.filename.clone(),
    };
    let mut ids = self.modules.did_open(&handle.dir, language_id, Some(document))?;
    ids.extend(self.roots.did_discover(&handle.dir, &self.cancel).await);
    Ok(ids)
  }

  pub fn did_change_document(
    &self,
    handle: &DocHandle,
    version: i32,
    changes: &[TextChange],
  ) -> Result<Vec<JobId>, StoreError> {
    let doc = self.store.documents().change(handle, version, changes)?;
    let document = DocumentContext {
      method: "textDocument/didChange".to_string(),
      language_id: doc.language_id.clone(),
      filename: handle.filename.clone(),
    };
    Ok(self.modules.did_change(&handle.dir, Some(document)))
  }

  pub fn did_close_document(&self, handle: &DocHandle) -> Result<(), StoreError> {
    self.store.documents().close(handle)
  }

  pub fn shutdown(&self) {
    self.cancel.cancel();
  }
}

/// Fan-in of the walker discovery hook to both features.
struct SessionDiscoverer {
  modules: Arc<ModulesFeature>,
  roots: Arc<RootModulesFeature>,
  cancel: CancellationToken,
}

#[async_trait]
impl ModuleDiscoverer for SessionDiscoverer {
  async fn discover(&self, dir: &DirHandle, _filenames: &[String]) -> Result<Vec<JobId>, String> {
    let mut ids = self.modules.discover(dir).map_err(|e| e.to_string())?;
    ids.extend(self.roots.did_discover(dir, &self.cancel).await);
    Ok(ids)
  }
}
