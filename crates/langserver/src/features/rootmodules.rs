//! Root-modules feature.
//!
//! A root module is a directory the external tool has initialised (it
//! has a `.terraform` data directory). The feature parses the install
//! manifest into a source-to-path mapping and records the tool's
//! reported version per directory.

use std::{path::PathBuf, sync::Arc};

use tofuls_core::{fsview::FileSystem, operation::OpType, path::DirHandle};
use tofuls_store::{InstalledManifest, Job, JobCtx, JobError, JobId, StateStore};
use tofuls_syntax::version::Version;
use tracing::{debug, warn};

use crate::tofu::ToolExec;

const DATA_DIR: &str = ".terraform";
const MANIFEST_REL_PATH: &str = ".terraform/modules/modules.json";

pub struct RootModulesFeature {
  store: StateStore,
  fs: Arc<dyn FileSystem>,
  tool: Option<ToolExec>,
}

impl RootModulesFeature {
  pub fn new(store: StateStore, fs: Arc<dyn FileSystem>) -> Self {
    let tool = match ToolExec::discover() {
      Ok(tool) => Some(tool),
      Err(err) => {
        debug!(error = %err, "external tool not found; version probing disabled");
        None
      }
    };
    Self { store, fs, tool }
  }

  pub fn with_tool(store: StateStore, fs: Arc<dyn FileSystem>, tool: Option<ToolExec>) -> Self {
    Self { store, fs, tool }
  }

  pub fn tool(&self) -> Option<&ToolExec> {
    self.tool.as_ref()
  }

  /// Registers `dir` as a root module if it has a data directory, and
  /// enqueues manifest parsing plus the tool version probe.
  pub async fn did_discover(self: &Arc<Self>, dir: &DirHandle, ctx_cancel: &tokio_util::sync::CancellationToken) -> Vec<JobId> {
    let mut ids = Vec::new();
    let data_dir = dir.path().join(DATA_DIR);
    let is_root = self
      .fs
      .metadata(&data_dir, ctx_cancel)
      .await
      .map(|meta| meta.is_dir)
      .unwrap_or(false);
    if !is_root {
      return ids;
    }

    if let Err(err) = self.store.roots().add_if_not_exists(dir) {
      warn!(%dir, error = %err, "failed to register root module");
      return ids;
    }

    let feature = self.clone();
    let manifest_dir = dir.clone();
    ids.push(self.store.jobs().enqueue(Job::new(
      dir.clone(),
      OpType::ParseModuleManifest,
      move |ctx| {
        let feature = feature.clone();
        let dir = manifest_dir.clone();
        async move { parse_module_manifest(&feature, &dir, &ctx).await }
      },
    )));

    if self.tool.is_some() {
      let feature = self.clone();
      let version_dir = dir.clone();
      ids.push(self.store.jobs().enqueue(Job::new(
        dir.clone(),
        OpType::GetToolVersion,
        move |ctx| {
          let feature = feature.clone();
          let dir = version_dir.clone();
          async move { get_tool_version(&feature, &dir, &ctx).await }
        },
      )));
    }

    ids
  }

  /// Resolves the installed on-disk path (relative to `root`) for a
  /// normalised module source string.
  pub fn installed_module_path(&self, root: &DirHandle, normalized_source: &str) -> Option<String> {
    self.store.roots().installed_module_path(root, normalized_source)
  }

  pub fn tool_version(&self, dir: &DirHandle) -> Option<Version> {
    self.store.roots().tool_version(dir)
  }
}

/// Parses the install manifest beneath the root.
pub async fn parse_module_manifest(
  feature: &RootModulesFeature,
  dir: &DirHandle,
  ctx: &JobCtx,
) -> Result<(), JobError> {
  let roots = feature.store.roots();
  roots.begin_manifest(dir, ctx.ignore_state)?;

  let manifest_path: PathBuf = dir.path().join(MANIFEST_REL_PATH);
  let bytes = match feature.fs.read_file(&manifest_path, &ctx.cancel).await {
    Ok(bytes) => bytes,
    Err(err) => {
      roots.update_manifest(dir, None)?;
      return Err(JobError::other(format!("{dir}: manifest file does not exist: {err}")));
    }
  };

  match InstalledManifest::parse(&bytes) {
    Ok(manifest) => {
      debug!(%dir, modules = manifest.modules.len(), "module manifest parsed");
      roots.update_manifest(dir, Some(manifest))?;
      Ok(())
    }
    Err(err) => {
      roots.update_manifest(dir, None)?;
      Err(JobError::other(format!("failed to parse manifest: {err}")))
    }
  }
}

/// Probes the external tool's version for the directory.
pub async fn get_tool_version(feature: &RootModulesFeature, dir: &DirHandle, ctx: &JobCtx) -> Result<(), JobError> {
  let Some(tool) = feature.tool() else {
    return Ok(());
  };
  match tool.version(dir, &ctx.cancel).await {
    Ok(version) => {
      debug!(%dir, %version, "tool version recorded");
      feature.store.roots().update_tool_version(dir, Some(version))?;
      Ok(())
    }
    Err(err) => {
      feature.store.roots().update_tool_version(dir, None)?;
      Err(JobError::other(err))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tofuls_core::fsview::MemFileSystem;
  use tokio_util::sync::CancellationToken;

  #[tokio::test]
  async fn discovers_initialised_roots_only() {
    let (store, _rx) = StateStore::new();
    let fs = MemFileSystem::new();
    fs.insert_file("/root/main.tf", b"".to_vec());
    fs.insert_file("/root/.terraform/modules/modules.json", br#"{"Modules":[]}"#.to_vec());
    fs.insert_file("/plain/main.tf", b"".to_vec());

    let feature = Arc::new(RootModulesFeature::with_tool(store.clone(), Arc::new(fs), None));
    let cancel = CancellationToken::new();

    let root = DirHandle::from_path("/root");
    let ids = feature.did_discover(&root, &cancel).await;
    assert_eq!(ids.len(), 1, "manifest job only, tool missing");
    assert!(store.roots().exists(&root));

    let plain = DirHandle::from_path("/plain");
    assert!(feature.did_discover(&plain, &cancel).await.is_empty());
    assert!(!store.roots().exists(&plain));
  }

  #[tokio::test]
  async fn manifest_job_parses_and_records() {
    let (store, _rx) = StateStore::new();
    let fs = MemFileSystem::new();
    fs.insert_file(
      "/root/.terraform/modules/modules.json",
      br#"{"Modules":[{"Key":"net","Source":"./net","Dir":"net"}]}"#.to_vec(),
    );

    let feature = Arc::new(RootModulesFeature::with_tool(store.clone(), Arc::new(fs), None));
    let root = DirHandle::from_path("/root");
    store.roots().add_if_not_exists(&root).unwrap();

    let ctx = JobCtx {
      cancel: CancellationToken::new(),
      ignore_state: false,
      document: None,
    };
    parse_module_manifest(&feature, &root, &ctx).await.unwrap();
    assert_eq!(feature.installed_module_path(&root, "./net"), Some("net".to_string()));

    // Second run skips idempotently
    let err = parse_module_manifest(&feature, &root, &ctx).await.unwrap_err();
    assert!(err.is_state_not_changed());
  }
}
