//! Modules feature: owns the per-module pipeline.
//!
//! Events (walker discovery, document opens and changes, watched-file
//! notifications) land here and turn into scheduled jobs:
//!
//! ```text
//! parse -> metadata --(defer)--> module-call fan-out*   (first level)
//!                                preload schema
//!                                reference targets  \  deps: fan-out + preload
//!                                reference origins  /
//!                                schema validation      (opt-in, first level)
//!                                reference validation   (deps: both reference jobs)
//!          metadata ----------> registry fetch          (low priority, first level)
//! ```
//!
//! The fan-out resolves declared module calls to on-disk directories and
//! recursively schedules the non-validation subset for them; resolution
//! failures become non-fatal diagnostics on the parent record.

pub mod jobs;

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use tofuls_core::{
  document::DocumentContext,
  fsview::FileSystem,
  operation::{DiagnosticSource, OpType},
  path::{DirHandle, DocHandle},
};
use tofuls_store::{Job, JobError, JobId, Priority, StateStore, StoreError};
use tofuls_syntax::{Diagnostic, addr::ModuleSourceAddr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{features::rootmodules::RootModulesFeature, schemas::BundledSchemas};

/// File change kinds forwarded from `workspace/didChangeWatchedFiles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedChange {
  Created,
  Changed,
  Deleted,
}

pub struct ModulesFeature {
  store: StateStore,
  fs: Arc<dyn FileSystem>,
  bundled_schemas: BundledSchemas,
  registry: tofuls_registry::Client,
  roots: Arc<RootModulesFeature>,
  validation_enabled: AtomicBool,
}

impl ModulesFeature {
  pub fn new(
    store: StateStore,
    fs: Arc<dyn FileSystem>,
    bundled_schemas: BundledSchemas,
    registry: tofuls_registry::Client,
    roots: Arc<RootModulesFeature>,
  ) -> Self {
    Self {
      store,
      fs,
      bundled_schemas,
      registry,
      roots,
      validation_enabled: AtomicBool::new(false),
    }
  }

  pub fn store(&self) -> &StateStore {
    &self.store
  }

  /// Gates the schema/reference validation jobs; set from the
  /// `validation.enableEnhancedValidation` initialization option.
  pub fn set_enhanced_validation(&self, enabled: bool) {
    self.validation_enabled.store(enabled, Ordering::Relaxed);
  }

  /// Walker hook: a directory containing module files was found.
  pub fn discover(self: &Arc<Self>, dir: &DirHandle) -> Result<Vec<JobId>, StoreError> {
    debug!(%dir, "discovered module directory");
    self.store.modules().add_if_not_exists(dir)?;
    Ok(self.decode_module(dir, false, true, None))
  }

  /// A document with a recognised language id was opened.
  pub fn did_open(
    self: &Arc<Self>,
    dir: &DirHandle,
    language_id: &str,
    document: Option<DocumentContext>,
  ) -> Result<Vec<JobId>, StoreError> {
    if crate::is_valid_config_language(language_id) {
      self.store.modules().add_if_not_exists(dir)?;
    }
    if !self.store.modules().exists(dir) {
      return Ok(Vec::new());
    }
    Ok(self.decode_module(dir, false, true, document))
  }

  /// An open document changed; the whole module re-decodes with
  /// ignore-state so every stage recomputes.
  pub fn did_change(self: &Arc<Self>, dir: &DirHandle, document: Option<DocumentContext>) -> Vec<JobId> {
    if !self.store.modules().exists(dir) {
      return Vec::new();
    }
    self.decode_module(dir, true, true, document)
  }

  /// Watched-file notification from the client.
  pub async fn did_change_watched(
    self: &Arc<Self>,
    raw_path: &std::path::Path,
    change: WatchedChange,
    is_dir: bool,
    cancel: &CancellationToken,
  ) -> Vec<JobId> {
    let modules = self.store.modules();
    match change {
      WatchedChange::Deleted => {
        // The notification does not say whether a file or a directory
        // went away; try the path as a module dir first, then its parent
        let as_dir = DirHandle::from_path(raw_path);
        if modules.exists(&as_dir) {
          self.remove_indexed_module(&as_dir);
          return Vec::new();
        }

        let Some(doc) = DocHandle::from_path(raw_path) else {
          return Vec::new();
        };
        if !modules.exists(&doc.dir) {
          return Vec::new();
        }
        let parent_gone = self
          .fs
          .metadata(doc.dir.path(), cancel)
          .await
          .map(|meta| !meta.is_dir)
          .unwrap_or(true);
        if parent_gone {
          self.remove_indexed_module(&doc.dir);
          return Vec::new();
        }
        if !self.store.documents().has_open_documents(&doc.dir) {
          return Vec::new();
        }
        self.decode_module(&doc.dir, true, true, None)
      }
      WatchedChange::Created | WatchedChange::Changed => {
        let dir = if is_dir {
          DirHandle::from_path(raw_path)
        } else {
          match DocHandle::from_path(raw_path) {
            Some(doc) => doc.dir,
            None => return Vec::new(),
          }
        };
        if !self.store.documents().has_open_documents(&dir) {
          return Vec::new();
        }
        if !modules.exists(&dir) {
          return Vec::new();
        }
        self.decode_module(&dir, true, true, None)
      }
    }
  }

  /// Drops a module: cancels its queued jobs and removes the record.
  pub fn remove_indexed_module(&self, dir: &DirHandle) {
    self.store.jobs().dequeue_jobs_for_dir(dir);
    if let Err(err) = self.store.modules().remove(dir) {
      warn!(%dir, error = %err, "failed to remove module from state");
    }
  }

  /// Enqueues the decode pipeline for one directory.
  ///
  /// `is_first_level` is unset for modules reached through the call
  /// fan-out; those skip validation and registry fetching.
  pub fn decode_module(
    self: &Arc<Self>,
    dir: &DirHandle,
    ignore_state: bool,
    is_first_level: bool,
    document: Option<DocumentContext>,
  ) -> Vec<JobId> {
    let jobs = self.store.jobs();
    let mut ids = Vec::new();

    let parse_id = {
      let feature = self.clone();
      let dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::ParseModuleConfiguration, move |ctx| {
          let feature = feature.clone();
          let dir = dir.clone();
          async move { jobs::parse_module_configuration(&feature.fs, &feature.store.modules(), &dir, &ctx).await }
        })
        .with_ignore_state(ignore_state)
        .with_document(document.clone()),
      )
    };
    ids.push(parse_id);

    // Validation gating is resolved at enqueue time; options cannot
    // change mid-session
    let validation_enabled = self.validation_enabled.load(Ordering::Relaxed);

    let meta_id = {
      let feature = self.clone();
      let meta_dir = dir.clone();
      let defer_feature = self.clone();
      let defer_dir = dir.clone();
      let defer_document = document.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::LoadModuleMetadata, move |ctx| {
          let feature = feature.clone();
          let dir = meta_dir.clone();
          async move { jobs::load_module_metadata(&feature.store.modules(), &dir, &ctx).await }
        })
        .depends_on([parse_id])
        .with_ignore_state(ignore_state)
        .with_document(document.clone())
        .with_defer(move |ctx, job_err| {
          let feature = defer_feature.clone();
          let dir = defer_dir.clone();
          let document = defer_document.clone();
          async move {
            feature
              .metadata_defer(ctx, job_err, dir, ignore_state, is_first_level, validation_enabled, document)
              .await
          }
        }),
      )
    };
    ids.push(meta_id);

    if !is_first_level {
      return ids;
    }

    // Registry fetches hit the network; they queue Low so interactive
    // work is never starved behind them
    let registry_feature = self.clone();
    let registry_dir = dir.clone();
    jobs.enqueue(
      Job::new(dir.clone(), OpType::GetModuleDataFromRegistry, move |ctx| {
        let feature = registry_feature.clone();
        let dir = registry_dir.clone();
        async move { jobs::get_module_data_from_registry(&feature.registry, &feature.store, &dir, &ctx).await }
      })
      .with_priority(Priority::Low)
      .depends_on([meta_id]),
    );

    ids
  }

  /// The deferred continuation of the metadata job.
  #[allow(clippy::too_many_arguments)]
  async fn metadata_defer(
    self: Arc<Self>,
    ctx: tofuls_store::JobCtx,
    job_err: Option<JobError>,
    dir: DirHandle,
    ignore_state: bool,
    is_first_level: bool,
    validation_enabled: bool,
    document: Option<DocumentContext>,
  ) -> (Vec<JobId>, Option<JobError>) {
    let jobs = self.store.jobs();
    let mut deferred = Vec::new();

    if let Some(err) = &job_err
      && !err.is_state_not_changed()
    {
      warn!(%dir, error = %err, "loading module metadata returned error");
    }

    let mut mod_call_ids = Vec::new();
    if is_first_level {
      let (ids, diags) = self.decode_declared_module_calls(&dir, ignore_state, &ctx.cancel).await;
      mod_call_ids = ids.clone();
      deferred.extend(ids);
      // Fan-out failures surface as non-fatal diagnostics on the parent
      // record instead of disappearing
      for (filename, diag) in diags {
        if let Err(err) =
          self
            .store
            .modules()
            .append_diagnostics(&dir, DiagnosticSource::ModuleCalls, &filename, vec![diag])
        {
          warn!(%dir, error = %err, "failed to record module call diagnostics");
        }
      }
    }

    let preload_id = {
      let feature = self.clone();
      let preload_dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::PreloadEmbeddedSchema, move |ctx| {
          let feature = feature.clone();
          let dir = preload_dir.clone();
          async move {
            jobs::preload_embedded_schema(
              &feature.bundled_schemas,
              &feature.store.provider_schemas(),
              &feature.store.modules(),
              &dir,
              &ctx,
            )
            .await
          }
        })
        .with_ignore_state(ignore_state),
      )
    };
    deferred.push(preload_id);

    let mut decode_deps = mod_call_ids.clone();
    decode_deps.push(preload_id);

    let ref_targets_id = {
      let feature = self.clone();
      let targets_dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::DecodeReferenceTargets, move |ctx| {
          let feature = feature.clone();
          let dir = targets_dir.clone();
          async move { jobs::decode_reference_targets(&feature.store.modules(), &dir, &ctx).await }
        })
        .depends_on(decode_deps.clone())
        .with_ignore_state(ignore_state),
      )
    };
    deferred.push(ref_targets_id);

    let ref_origins_id = {
      let feature = self.clone();
      let origins_dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::DecodeReferenceOrigins, move |ctx| {
          let feature = feature.clone();
          let dir = origins_dir.clone();
          async move { jobs::decode_reference_origins(&feature.store.modules(), &dir, &ctx).await }
        })
        .depends_on(decode_deps.clone())
        .with_ignore_state(ignore_state),
      )
    };
    deferred.push(ref_origins_id);

    // Nested modules are never validated
    if is_first_level && validation_enabled {
      let schema_feature = self.clone();
      let schema_dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::SchemaModuleValidation, move |ctx| {
          let feature = schema_feature.clone();
          let dir = schema_dir.clone();
          async move { jobs::schema_module_validation(&feature.store, &dir, &ctx).await }
        })
        .depends_on(decode_deps)
        .with_ignore_state(ignore_state)
        .with_document(document.clone()),
      );

      let refs_feature = self.clone();
      let refs_dir = dir.clone();
      jobs.enqueue(
        Job::new(dir.clone(), OpType::ReferenceValidation, move |ctx| {
          let feature = refs_feature.clone();
          let dir = refs_dir.clone();
          async move { jobs::reference_validation(&feature.store, &dir, &ctx).await }
        })
        .depends_on([ref_origins_id, ref_targets_id])
        .with_ignore_state(ignore_state),
      );
    }

    (deferred, None)
  }

  /// Resolves declared module calls to on-disk directories, registers
  /// them and schedules the nested (non-validation) pipeline for each.
  /// Per-call failures come back as diagnostics for the parent.
  async fn decode_declared_module_calls(
    self: &Arc<Self>,
    dir: &DirHandle,
    ignore_state: bool,
    cancel: &CancellationToken,
  ) -> (Vec<JobId>, Vec<(String, Diagnostic)>) {
    let mut ids = Vec::new();
    let mut diags = Vec::new();

    let declared = match self.store.modules().declared_module_calls(dir) {
      Ok(declared) => declared,
      Err(err) => {
        warn!(%dir, error = %err, "failed to read declared module calls");
        return (ids, diags);
      }
    };

    for call in declared.values() {
      let call_path = match &call.source {
        // Local sources resolve directly from the configuration
        ModuleSourceAddr::Local(rel) => dir.join(rel),
        // Registry and other remote sources resolve through the install
        // manifest, if the module is installed
        ModuleSourceAddr::Registry(_) | ModuleSourceAddr::Remote(_) => {
          match self.roots.installed_module_path(dir, &call.source_string) {
            Some(rel) => dir.join(rel),
            None => continue,
          }
        }
      };

      let exists = self
        .fs
        .metadata(call_path.path(), cancel)
        .await
        .map(|meta| meta.is_dir)
        .unwrap_or(false);
      if !exists {
        diags.push((
          call.filename.clone(),
          Diagnostic::warning(
            format!("module {:?} is not installed at {call_path}", call.local_name),
            call.source_span,
          ),
        ));
        continue;
      }

      let mut call_ignore_state = ignore_state;
      match self.store.modules().add(&call_path) {
        Ok(()) => {}
        Err(err) if err.is_already_exists() => {
          // Keep the existing record's progress; do not force a re-run
          call_ignore_state = false;
        }
        Err(err) => {
          diags.push((
            call.filename.clone(),
            Diagnostic::warning(
              format!("failed to index module {:?}: {err}", call.local_name),
              call.source_span,
            ),
          ));
          continue;
        }
      }

      ids.extend(self.decode_module(&call_path, call_ignore_state, false, None));
    }

    (ids, diags)
  }
}
