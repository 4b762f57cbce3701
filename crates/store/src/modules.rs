//! Module records: parsed files, metadata, references, diagnostics and
//! the per-stage state machine.

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use tofuls_core::{
  operation::{DiagnosticSource, OpState},
  path::DirHandle,
};
use tofuls_syntax::{
  Diagnostic, File,
  metadata::{DeclaredModuleCall, ModuleMeta},
  reference::{ReferenceOrigin, ReferenceTarget},
};

use crate::{Inner, StoreError};

/// Pipeline stages tracked per module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleStage {
  Parse,
  Metadata,
  PreloadSchema,
  ReferenceTargets,
  ReferenceOrigins,
  RegistryFetch,
  Diagnostics(DiagnosticSource),
}

#[derive(Debug, Clone, Default)]
pub struct StageStates {
  pub parse: OpState,
  pub metadata: OpState,
  pub preload_schema: OpState,
  pub reference_targets: OpState,
  pub reference_origins: OpState,
  pub registry_fetch: OpState,
  pub diagnostics: HashMap<DiagnosticSource, OpState>,
}

impl StageStates {
  pub fn get(&self, stage: ModuleStage) -> OpState {
    match stage {
      ModuleStage::Parse => self.parse,
      ModuleStage::Metadata => self.metadata,
      ModuleStage::PreloadSchema => self.preload_schema,
      ModuleStage::ReferenceTargets => self.reference_targets,
      ModuleStage::ReferenceOrigins => self.reference_origins,
      ModuleStage::RegistryFetch => self.registry_fetch,
      ModuleStage::Diagnostics(source) => self.diagnostics.get(&source).copied().unwrap_or_default(),
    }
  }

  fn set(&mut self, stage: ModuleStage, state: OpState) {
    match stage {
      ModuleStage::Parse => self.parse = state,
      ModuleStage::Metadata => self.metadata = state,
      ModuleStage::PreloadSchema => self.preload_schema = state,
      ModuleStage::ReferenceTargets => self.reference_targets = state,
      ModuleStage::ReferenceOrigins => self.reference_origins = state,
      ModuleStage::RegistryFetch => self.registry_fetch = state,
      ModuleStage::Diagnostics(source) => {
        self.diagnostics.insert(source, state);
      }
    }
  }
}

/// One indexed module directory. Reads hand out clones of this record;
/// mutating a clone never affects the store.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
  pub dir: DirHandle,
  pub parsed_files: BTreeMap<String, Arc<File>>,
  pub meta: Arc<ModuleMeta>,
  pub ref_targets: Arc<Vec<ReferenceTarget>>,
  pub ref_origins: Arc<Vec<ReferenceOrigin>>,
  /// filename -> diagnostics, bucketed by producing source.
  pub diagnostics: HashMap<DiagnosticSource, BTreeMap<String, Vec<Diagnostic>>>,
  pub states: StageStates,
}

impl ModuleRecord {
  fn new(dir: DirHandle) -> Self {
    Self {
      dir,
      parsed_files: BTreeMap::new(),
      meta: Arc::new(ModuleMeta::default()),
      ref_targets: Arc::new(Vec::new()),
      ref_origins: Arc::new(Vec::new()),
      diagnostics: HashMap::new(),
      states: StageStates::default(),
    }
  }

  /// All diagnostics for one file, across sources.
  pub fn file_diagnostics(&self, filename: &str) -> Vec<(DiagnosticSource, Diagnostic)> {
    let mut out = Vec::new();
    for (source, by_file) in &self.diagnostics {
      if let Some(diags) = by_file.get(filename) {
        out.extend(diags.iter().cloned().map(|d| (*source, d)));
      }
    }
    out
  }

  /// Filenames mentioned anywhere on the record.
  pub fn known_filenames(&self) -> Vec<String> {
    let mut names: Vec<String> = self.parsed_files.keys().cloned().collect();
    for by_file in self.diagnostics.values() {
      for name in by_file.keys() {
        if !names.contains(name) {
          names.push(name.clone());
        }
      }
    }
    names.sort();
    names
  }
}

#[derive(Default, Clone)]
pub(crate) struct ModuleTable {
  pub(crate) records: HashMap<DirHandle, ModuleRecord>,
}

/// Facade over the module table.
#[derive(Clone)]
pub struct ModuleStore {
  inner: Arc<Inner>,
}

impl ModuleStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  /// Registers a directory, failing with [`StoreError::AlreadyExists`]
  /// when a record is present.
  pub fn add(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      if tables.modules.records.contains_key(dir) {
        return Err(StoreError::AlreadyExists(dir.clone()));
      }
      tables.modules.records.insert(dir.clone(), ModuleRecord::new(dir.clone()));
      Ok(())
    })
  }

  /// Idempotent insert; concurrent callers observe exactly one success.
  pub fn add_if_not_exists(&self, dir: &DirHandle) -> Result<(), StoreError> {
    match self.add(dir) {
      Ok(()) => Ok(()),
      Err(err) if err.is_already_exists() => Ok(()),
      Err(err) => Err(err),
    }
  }

  pub fn exists(&self, dir: &DirHandle) -> bool {
    self.inner.snapshot().modules.records.contains_key(dir)
  }

  /// Removes the record and cancels any jobs still queued for it.
  pub fn remove(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.modules.records.remove(dir);
      tables.jobs.dequeue_for_dir(dir);
      Ok(())
    })?;
    self.inner.notify_change(dir.clone());
    Ok(())
  }

  /// Snapshot clone of a record, never a live alias.
  pub fn record_by_path(&self, dir: &DirHandle) -> Result<ModuleRecord, StoreError> {
    self
      .inner
      .snapshot()
      .modules
      .records
      .get(dir)
      .cloned()
      .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))
  }

  pub fn list(&self) -> Vec<ModuleRecord> {
    let mut records: Vec<ModuleRecord> = self.inner.snapshot().modules.records.values().cloned().collect();
    records.sort_by(|a, b| a.dir.cmp(&b.dir));
    records
  }

  pub fn declared_module_calls(&self, dir: &DirHandle) -> Result<HashMap<String, DeclaredModuleCall>, StoreError> {
    Ok(self.record_by_path(dir)?.meta.module_calls.clone())
  }

  /// Claims a stage for the calling job: transitions `Unknown -> Loading`
  /// or fails with [`StoreError::StateNotChanged`] when the stage already
  /// ran and `ignore_state` is unset.
  pub fn begin_operation(&self, dir: &DirHandle, stage: ModuleStage, ignore_state: bool) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .modules
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      if record.states.get(stage) != OpState::Unknown && !ignore_state {
        return Err(StoreError::StateNotChanged { dir: dir.clone() });
      }
      record.states.set(stage, OpState::Loading);
      Ok(())
    })
  }

  /// Marks a claimed stage `LoadedErr` without touching the record's
  /// data. Error paths use this so no stage is left in `Loading` after
  /// its run completes; a later re-run with ignore-state recomputes it.
  pub fn fail_stage(&self, dir: &DirHandle, stage: ModuleStage) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .modules
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      record.states.set(stage, OpState::LoadedErr);
      Ok(())
    })
  }

  fn finish_stage(
    &self,
    dir: &DirHandle,
    stage: ModuleStage,
    ok: bool,
    update: impl FnOnce(&mut ModuleRecord),
  ) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .modules
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      update(record);
      record.states.set(stage, OpState::from_result(ok));
      Ok(())
    })
  }

  pub fn update_parsed_files(
    &self,
    dir: &DirHandle,
    files: BTreeMap<String, Arc<File>>,
    diagnostics: BTreeMap<String, Vec<Diagnostic>>,
  ) -> Result<(), StoreError> {
    let ok = diagnostics.values().all(|d| d.is_empty());
    self.finish_stage(dir, ModuleStage::Parse, ok, |record| {
      record.parsed_files = files;
      record.diagnostics.insert(DiagnosticSource::Parsing, diagnostics);
    })?;
    self.inner.notify_change(dir.clone());
    Ok(())
  }

  pub fn update_metadata(&self, dir: &DirHandle, meta: ModuleMeta, err: bool) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::Metadata, !err, |record| {
      record.meta = Arc::new(meta);
    })
  }

  pub fn finish_preload(&self, dir: &DirHandle, ok: bool) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::PreloadSchema, ok, |_| {})
  }

  pub fn update_ref_targets(&self, dir: &DirHandle, targets: Vec<ReferenceTarget>) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::ReferenceTargets, true, |record| {
      record.ref_targets = Arc::new(targets);
    })
  }

  pub fn update_ref_origins(&self, dir: &DirHandle, origins: Vec<ReferenceOrigin>) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::ReferenceOrigins, true, |record| {
      record.ref_origins = Arc::new(origins);
    })
  }

  pub fn finish_registry_fetch(&self, dir: &DirHandle, ok: bool) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::RegistryFetch, ok, |_| {})
  }

  /// Replaces the whole diagnostics bag for one source.
  pub fn update_diagnostics(
    &self,
    dir: &DirHandle,
    source: DiagnosticSource,
    diagnostics: BTreeMap<String, Vec<Diagnostic>>,
  ) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::Diagnostics(source), true, |record| {
      record.diagnostics.insert(source, diagnostics);
    })?;
    self.inner.notify_change(dir.clone());
    Ok(())
  }

  /// Replaces diagnostics of one source for a single file, leaving other
  /// files untouched. Used by the didChange revalidation path.
  pub fn update_file_diagnostics(
    &self,
    dir: &DirHandle,
    source: DiagnosticSource,
    filename: &str,
    diagnostics: Vec<Diagnostic>,
  ) -> Result<(), StoreError> {
    self.finish_stage(dir, ModuleStage::Diagnostics(source), true, |record| {
      record
        .diagnostics
        .entry(source)
        .or_default()
        .insert(filename.to_string(), diagnostics);
    })?;
    self.inner.notify_change(dir.clone());
    Ok(())
  }

  /// Appends non-fatal diagnostics (module-call fan-out failures land
  /// here, on the parent record).
  pub fn append_diagnostics(
    &self,
    dir: &DirHandle,
    source: DiagnosticSource,
    filename: &str,
    diagnostics: Vec<Diagnostic>,
  ) -> Result<(), StoreError> {
    if diagnostics.is_empty() {
      return Ok(());
    }
    self.inner.write(|tables| {
      let record = tables
        .modules
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      record
        .diagnostics
        .entry(source)
        .or_default()
        .entry(filename.to_string())
        .or_default()
        .extend(diagnostics);
      Ok(())
    })?;
    self.inner.notify_change(dir.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  fn store() -> ModuleStore {
    StateStore::new().0.modules()
  }

  #[test]
  fn add_if_not_exists_is_idempotent() {
    let modules = store();
    let dir = DirHandle::from_path("/mod");
    assert!(modules.add(&dir).is_ok());
    assert!(matches!(modules.add(&dir), Err(StoreError::AlreadyExists(_))));
    assert!(modules.add_if_not_exists(&dir).is_ok());
  }

  #[test]
  fn begin_operation_claims_stage_once() {
    let modules = store();
    let dir = DirHandle::from_path("/mod");
    modules.add(&dir).unwrap();

    modules.begin_operation(&dir, ModuleStage::Metadata, false).unwrap();
    // Already Loading: a second claimant without ignore-state is turned away
    let err = modules.begin_operation(&dir, ModuleStage::Metadata, false).unwrap_err();
    assert!(matches!(err, StoreError::StateNotChanged { .. }));

    modules.update_metadata(&dir, ModuleMeta::default(), false).unwrap();
    let record = modules.record_by_path(&dir).unwrap();
    assert_eq!(record.states.metadata, OpState::LoadedOk);

    // Terminal state: still turned away without ignore-state...
    assert!(modules.begin_operation(&dir, ModuleStage::Metadata, false).is_err());
    // ...but ignore-state forces a re-run
    assert!(modules.begin_operation(&dir, ModuleStage::Metadata, true).is_ok());
  }

  #[test]
  fn record_reads_are_snapshots() {
    let modules = store();
    let dir = DirHandle::from_path("/mod");
    modules.add(&dir).unwrap();

    let before = modules.record_by_path(&dir).unwrap();
    modules.begin_operation(&dir, ModuleStage::Parse, false).unwrap();
    assert_eq!(before.states.parse, OpState::Unknown);
    assert_eq!(modules.record_by_path(&dir).unwrap().states.parse, OpState::Loading);
  }

  #[test]
  fn remove_unknown_dir_is_ok() {
    let modules = store();
    assert!(modules.remove(&DirHandle::from_path("/nope")).is_ok());
  }
}
