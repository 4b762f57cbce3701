//! Root-module records: install manifest and external tool version.

use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use tofuls_core::{operation::OpState, path::DirHandle};
use tofuls_syntax::version::Version;

use crate::{Inner, StoreError};

/// One entry of the install manifest: a module source mapped to where the
/// tool installed it, relative to the root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstalledModule {
  #[serde(rename = "Key", default)]
  pub key: String,
  #[serde(rename = "Source", default)]
  pub source: String,
  #[serde(rename = "Dir", default)]
  pub dir: String,
}

/// Parsed install manifest (`.terraform/modules/modules.json`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct InstalledManifest {
  #[serde(rename = "Modules", default)]
  pub modules: Vec<InstalledModule>,
}

impl InstalledManifest {
  pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }

  /// Looks up the installed relative path for a normalised source string.
  pub fn installed_path(&self, normalized_source: &str) -> Option<&str> {
    self
      .modules
      .iter()
      .find(|m| m.source == normalized_source && !m.dir.is_empty())
      .map(|m| m.dir.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct RootRecord {
  pub dir: DirHandle,
  pub manifest: Option<Arc<InstalledManifest>>,
  pub manifest_state: OpState,
  pub tool_version: Option<Version>,
  pub tool_version_state: OpState,
}

impl RootRecord {
  fn new(dir: DirHandle) -> Self {
    Self {
      dir,
      manifest: None,
      manifest_state: OpState::Unknown,
      tool_version: None,
      tool_version_state: OpState::Unknown,
    }
  }
}

#[derive(Default, Clone)]
pub(crate) struct RootTable {
  pub(crate) records: HashMap<DirHandle, RootRecord>,
}

/// Facade over the root-module table.
#[derive(Clone)]
pub struct RootStore {
  inner: Arc<Inner>,
}

impl RootStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  pub fn add_if_not_exists(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables
        .roots
        .records
        .entry(dir.clone())
        .or_insert_with(|| RootRecord::new(dir.clone()));
      Ok(())
    })
  }

  pub fn exists(&self, dir: &DirHandle) -> bool {
    self.inner.snapshot().roots.records.contains_key(dir)
  }

  pub fn remove(&self, dir: &DirHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.roots.records.remove(dir);
      tables.jobs.dequeue_for_dir(dir);
      Ok(())
    })
  }

  pub fn record_by_path(&self, dir: &DirHandle) -> Result<RootRecord, StoreError> {
    self
      .inner
      .snapshot()
      .roots
      .records
      .get(dir)
      .cloned()
      .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))
  }

  pub fn list(&self) -> Vec<RootRecord> {
    let mut records: Vec<RootRecord> = self.inner.snapshot().roots.records.values().cloned().collect();
    records.sort_by(|a, b| a.dir.cmp(&b.dir));
    records
  }

  /// Claims the manifest stage (see [`crate::ModuleStore::begin_operation`]).
  pub fn begin_manifest(&self, dir: &DirHandle, ignore_state: bool) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .roots
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      if record.manifest_state != OpState::Unknown && !ignore_state {
        return Err(StoreError::StateNotChanged { dir: dir.clone() });
      }
      record.manifest_state = OpState::Loading;
      Ok(())
    })
  }

  pub fn update_manifest(&self, dir: &DirHandle, manifest: Option<InstalledManifest>) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .roots
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      record.manifest_state = OpState::from_result(manifest.is_some());
      record.manifest = manifest.map(Arc::new);
      Ok(())
    })
  }

  pub fn update_tool_version(&self, dir: &DirHandle, version: Option<Version>) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      let record = tables
        .roots
        .records
        .get_mut(dir)
        .ok_or_else(|| StoreError::ModuleNotFound(dir.clone()))?;
      record.tool_version_state = OpState::from_result(version.is_some());
      record.tool_version = version;
      Ok(())
    })
  }

  pub fn tool_version(&self, dir: &DirHandle) -> Option<Version> {
    self
      .inner
      .snapshot()
      .roots
      .records
      .get(dir)
      .and_then(|r| r.tool_version.clone())
  }

  /// Resolves an installed module path beneath `root` for a source
  /// string, per the install manifest. Returns the path relative to the
  /// root plus a found flag.
  pub fn installed_module_path(&self, root: &DirHandle, normalized_source: &str) -> Option<String> {
    let tables = self.inner.snapshot();
    let record = tables.roots.records.get(root)?;
    let manifest = record.manifest.as_ref()?;
    manifest.installed_path(normalized_source).map(str::to_string)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;

  const MANIFEST: &str = r#"{
    "Modules": [
      { "Key": "", "Source": "", "Dir": "." },
      { "Key": "net", "Source": "terraform-aws-modules/vpc/aws", "Dir": ".terraform/modules/net" }
    ]
  }"#;

  #[test]
  fn manifest_parse_and_lookup() {
    let manifest = InstalledManifest::parse(MANIFEST.as_bytes()).unwrap();
    assert_eq!(
      manifest.installed_path("terraform-aws-modules/vpc/aws"),
      Some(".terraform/modules/net")
    );
    assert_eq!(manifest.installed_path("missing/thing/aws"), None);
  }

  #[test]
  fn installed_module_path_via_store() {
    let (store, _rx) = StateStore::new();
    let roots = store.roots();
    let dir = DirHandle::from_path("/root");
    roots.add_if_not_exists(&dir).unwrap();
    roots
      .update_manifest(&dir, Some(InstalledManifest::parse(MANIFEST.as_bytes()).unwrap()))
      .unwrap();

    assert_eq!(
      roots.installed_module_path(&dir, "terraform-aws-modules/vpc/aws"),
      Some(".terraform/modules/net".to_string())
    );
    assert_eq!(roots.installed_module_path(&dir, "nope"), None);
    assert_eq!(roots.record_by_path(&dir).unwrap().manifest_state, OpState::LoadedOk);
  }
}
