//! Bundled provider schema tree.
//!
//! Schemas ship alongside the binary as gzipped providers-schema JSON,
//! laid out as `<root>/<hostname>/<namespace>/<type>/<version>/schema.json.gz`.
//! Access goes through the filesystem view so tests can substitute an
//! in-memory tree (and so loading honours cancellation).

use std::{
  io::Read,
  path::{Path, PathBuf},
  sync::Arc,
};

use flate2::read::GzDecoder;
use tofuls_core::fsview::{FileSystem, FsError, OsFileSystem};
use tofuls_syntax::{
  addr::ProviderAddr,
  schema::ProviderSchema,
  version::{Version, VersionConstraints},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const SCHEMA_DIR_ENV: &str = "TOFU_LS_SCHEMA_DIR";
const SCHEMA_FILENAME: &str = "schema.json.gz";

#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
  #[error("failed to read schema tree: {0}")]
  Fs(#[from] FsError),

  #[error("failed to decompress {path}: {source}")]
  Gzip {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to decode {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Handle to the bundled schema tree.
#[derive(Clone)]
pub struct BundledSchemas {
  pub fs: Arc<dyn FileSystem>,
  pub root: PathBuf,
}

impl BundledSchemas {
  pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
    Self { fs, root: root.into() }
  }

  /// Locates the tree next to the executable, overridable via
  /// `TOFU_LS_SCHEMA_DIR`.
  pub fn discover() -> Self {
    let root = std::env::var_os(SCHEMA_DIR_ENV)
      .map(PathBuf::from)
      .or_else(|| {
        std::env::current_exe()
          .ok()
          .and_then(|exe| exe.parent().map(|dir| dir.join("schemas")))
      })
      .unwrap_or_else(|| PathBuf::from("schemas"));
    debug!(root = %root.display(), "bundled schema tree");
    Self::new(Arc::new(OsFileSystem), root)
  }

  fn provider_dir(&self, addr: &ProviderAddr) -> PathBuf {
    self
      .root
      .join(&addr.hostname)
      .join(&addr.namespace)
      .join(&addr.type_name)
  }

  /// Versions available for one provider, descending.
  pub async fn available_versions(
    &self,
    addr: &ProviderAddr,
    cancel: &CancellationToken,
  ) -> Result<Vec<Version>, SchemaLoadError> {
    let dir = self.provider_dir(addr);
    let entries = match self.fs.read_dir(&dir, cancel).await {
      Ok(entries) => entries,
      Err(FsError::NotFound(_)) => return Ok(Vec::new()),
      Err(err) => return Err(err.into()),
    };
    let mut versions: Vec<Version> = entries
      .iter()
      .filter(|e| e.is_dir)
      .filter_map(|e| e.name.parse().ok())
      .collect();
    versions.sort();
    versions.reverse();
    Ok(versions)
  }

  /// Loads the best bundled schema for a provider: the newest version
  /// satisfying the constraints, else the newest available.
  pub async fn load(
    &self,
    addr: &ProviderAddr,
    constraints: Option<&VersionConstraints>,
    cancel: &CancellationToken,
  ) -> Result<Option<(Version, ProviderSchema)>, SchemaLoadError> {
    let versions = self.available_versions(addr, cancel).await?;
    let picked = versions
      .iter()
      .find(|v| match constraints {
        Some(cons) if !cons.is_empty() => cons.matches(v),
        _ => true,
      })
      .or_else(|| versions.first())
      .cloned();
    let Some(version) = picked else {
      trace!(%addr, "no bundled schema");
      return Ok(None);
    };

    let path = self.provider_dir(addr).join(version.to_string()).join(SCHEMA_FILENAME);
    let compressed = self.fs.read_file(&path, cancel).await?;
    let bytes = gunzip(&compressed).map_err(|source| SchemaLoadError::Gzip {
      path: path.clone(),
      source,
    })?;
    let schema = ProviderSchema::from_json_bytes(&bytes, &addr.to_string())
      .map_err(|source| SchemaLoadError::Decode { path, source })?;
    debug!(%addr, %version, "bundled schema loaded");
    Ok(Some((version, schema)))
  }
}

fn gunzip(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
  let mut decoder = GzDecoder::new(compressed);
  let mut out = Vec::new();
  decoder.read_to_end(&mut out)?;
  Ok(out)
}

/// Test helper: gzip-compresses a schema document the way the bundled
/// tree stores them.
pub fn gzip_bytes(bytes: &[u8]) -> Vec<u8> {
  use flate2::{Compression, write::GzEncoder};
  use std::io::Write;

  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(bytes).expect("in-memory gzip cannot fail");
  encoder.finish().expect("in-memory gzip cannot fail")
}

/// Builds an in-memory schema tree entry path for tests.
pub fn schema_path(root: &Path, addr: &ProviderAddr, version: &Version) -> PathBuf {
  root
    .join(&addr.hostname)
    .join(&addr.namespace)
    .join(&addr.type_name)
    .join(version.to_string())
    .join(SCHEMA_FILENAME)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tofuls_core::fsview::MemFileSystem;

  const SCHEMA_JSON: &str = r#"{
    "format_version": "1.0",
    "provider_schemas": {
      "registry.opentofu.org/builtin/terraform": {
        "data_source_schemas": {
          "terraform_remote_state": {
            "version": 0,
            "block": { "attributes": { "backend": { "type": "string", "required": true } } }
          }
        }
      }
    }
  }"#;

  #[tokio::test]
  async fn loads_gzipped_schema_from_memory_tree() {
    let fs = MemFileSystem::new();
    let addr = ProviderAddr::builtin("terraform");
    let root = PathBuf::from("/schemas");
    fs.insert_file(
      schema_path(&root, &addr, &Version::new(1, 0, 0)),
      gzip_bytes(SCHEMA_JSON.as_bytes()),
    );

    let bundled = BundledSchemas::new(Arc::new(fs), root);
    let cancel = CancellationToken::new();
    let (version, schema) = bundled.load(&addr, None, &cancel).await.unwrap().unwrap();
    assert_eq!(version, Version::new(1, 0, 0));
    assert!(schema.data_sources.contains_key("terraform_remote_state"));
  }

  #[tokio::test]
  async fn picks_version_matching_constraint() {
    let fs = MemFileSystem::new();
    let addr = ProviderAddr::builtin("terraform");
    let root = PathBuf::from("/schemas");
    for version in ["1.0.0", "2.3.0"] {
      fs.insert_file(
        schema_path(&root, &addr, &version.parse().unwrap()),
        gzip_bytes(SCHEMA_JSON.as_bytes()),
      );
    }

    let bundled = BundledSchemas::new(Arc::new(fs), root);
    let cancel = CancellationToken::new();
    let cons: VersionConstraints = "~> 1.0".parse().unwrap();
    let (version, _) = bundled.load(&addr, Some(&cons), &cancel).await.unwrap().unwrap();
    assert_eq!(version, Version::new(1, 0, 0));

    let (version, _) = bundled.load(&addr, None, &cancel).await.unwrap().unwrap();
    assert_eq!(version, Version::new(2, 3, 0));
  }

  #[tokio::test]
  async fn missing_provider_is_not_an_error() {
    let bundled = BundledSchemas::new(Arc::new(MemFileSystem::new()), "/schemas");
    let addr = ProviderAddr::parse("integrations/github").unwrap();
    let cancel = CancellationToken::new();
    assert!(bundled.load(&addr, None, &cancel).await.unwrap().is_none());
  }
}
