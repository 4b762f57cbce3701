//! Read-only, cancellable filesystem view.
//!
//! All pipeline jobs read bytes and directory listings exclusively through
//! [`FileSystem`], never `std::fs` directly, so tests can substitute an
//! in-memory tree and so every read honours the caller's cancellation
//! token. The view is strictly read-only; the server never writes to the
//! workspace.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
  #[error("file not found: {0}")]
  NotFound(PathBuf),

  #[error("not a directory: {0}")]
  NotADirectory(PathBuf),

  #[error("operation cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Metadata subset the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
  pub is_dir: bool,
  pub len: u64,
}

/// A single directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
  pub name: String,
  pub is_dir: bool,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
  async fn read_file(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<u8>, FsError>;
  async fn metadata(&self, path: &Path, cancel: &CancellationToken) -> Result<FileMeta, FsError>;
  async fn read_dir(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<DirEntry>, FsError>;
}

// ============================================================================
// OS-backed view
// ============================================================================

/// Filesystem view over the real disk via `tokio::fs`.
#[derive(Debug, Default, Clone)]
pub struct OsFileSystem;

#[async_trait]
impl FileSystem for OsFileSystem {
  async fn read_file(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<u8>, FsError> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(FsError::Cancelled),
      res = tokio::fs::read(path) => res.map_err(|e| map_io(e, path)),
    }
  }

  async fn metadata(&self, path: &Path, cancel: &CancellationToken) -> Result<FileMeta, FsError> {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => Err(FsError::Cancelled),
      res = tokio::fs::metadata(path) => {
        let meta = res.map_err(|e| map_io(e, path))?;
        Ok(FileMeta { is_dir: meta.is_dir(), len: meta.len() })
      }
    }
  }

  async fn read_dir(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<DirEntry>, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    let mut reader = tokio::fs::read_dir(path).await.map_err(|e| map_io(e, path))?;
    let mut entries = Vec::new();
    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FsError::Cancelled),
        next = reader.next_entry() => {
          match next.map_err(FsError::Io)? {
            Some(entry) => {
              let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
              entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
              });
            }
            None => break,
          }
        }
      }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
  }
}

fn map_io(err: std::io::Error, path: &Path) -> FsError {
  if err.kind() == std::io::ErrorKind::NotFound {
    FsError::NotFound(path.to_path_buf())
  } else {
    FsError::Io(err)
  }
}

// ============================================================================
// In-memory view
// ============================================================================

/// In-memory filesystem for tests and bundled resource trees.
///
/// Directories are implied by inserted file paths; intermediate components
/// do not need to be registered separately.
#[derive(Debug, Default, Clone)]
pub struct MemFileSystem {
  files: Arc<RwLock<BTreeMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl MemFileSystem {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert_file(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
    let path = crate::path::normalize_path(path.into());
    self.files.write().expect("memfs lock poisoned").insert(path, Arc::new(contents.into()));
  }

  pub fn remove_file(&self, path: &Path) {
    self.files.write().expect("memfs lock poisoned").remove(path);
  }

  fn is_implied_dir(files: &BTreeMap<PathBuf, Arc<Vec<u8>>>, path: &Path) -> bool {
    files.keys().any(|p| p.starts_with(path) && p != path)
  }
}

#[async_trait]
impl FileSystem for MemFileSystem {
  async fn read_file(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<u8>, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    let files = self.files.read().expect("memfs lock poisoned");
    files
      .get(path)
      .map(|bytes| bytes.as_ref().clone())
      .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
  }

  async fn metadata(&self, path: &Path, cancel: &CancellationToken) -> Result<FileMeta, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    let files = self.files.read().expect("memfs lock poisoned");
    if let Some(bytes) = files.get(path) {
      return Ok(FileMeta {
        is_dir: false,
        len: bytes.len() as u64,
      });
    }
    if Self::is_implied_dir(&files, path) {
      return Ok(FileMeta { is_dir: true, len: 0 });
    }
    Err(FsError::NotFound(path.to_path_buf()))
  }

  async fn read_dir(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<DirEntry>, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    let files = self.files.read().expect("memfs lock poisoned");
    if files.contains_key(path) {
      return Err(FsError::NotADirectory(path.to_path_buf()));
    }
    let mut names: BTreeMap<String, bool> = BTreeMap::new();
    for file in files.keys() {
      let Ok(rest) = file.strip_prefix(path) else { continue };
      let mut components = rest.components();
      let Some(first) = components.next() else { continue };
      let name = first.as_os_str().to_string_lossy().into_owned();
      let is_dir = components.next().is_some();
      // A name listed as both file and dir stays a dir
      let entry = names.entry(name).or_insert(is_dir);
      *entry |= is_dir;
    }
    if names.is_empty() && !Self::is_implied_dir(&files, path) {
      return Err(FsError::NotFound(path.to_path_buf()));
    }
    Ok(names.into_iter().map(|(name, is_dir)| DirEntry { name, is_dir }).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn mem_fs_lists_implied_directories() {
    let fs = MemFileSystem::new();
    fs.insert_file("/root/a/main.tf", b"x".to_vec());
    fs.insert_file("/root/a/sub/other.tf", b"y".to_vec());
    fs.insert_file("/root/b.tf", b"z".to_vec());

    let cancel = CancellationToken::new();
    let entries = fs.read_dir(Path::new("/root"), &cancel).await.unwrap();
    assert_eq!(
      entries,
      vec![
        DirEntry { name: "a".into(), is_dir: true },
        DirEntry { name: "b.tf".into(), is_dir: false },
      ]
    );

    let entries = fs.read_dir(Path::new("/root/a"), &cancel).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.name == "main.tf" && !e.is_dir));
    assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));
  }

  #[tokio::test]
  async fn mem_fs_read_honours_cancellation() {
    let fs = MemFileSystem::new();
    fs.insert_file("/root/main.tf", b"x".to_vec());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fs.read_file(Path::new("/root/main.tf"), &cancel).await.unwrap_err();
    assert!(matches!(err, FsError::Cancelled));
  }

  #[tokio::test]
  async fn os_fs_reads_real_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.tf");
    std::fs::write(&path, b"variable \"x\" {}").unwrap();

    let fs = OsFileSystem;
    let cancel = CancellationToken::new();
    let bytes = fs.read_file(&path, &cancel).await.unwrap();
    assert_eq!(bytes, b"variable \"x\" {}");

    let meta = fs.metadata(dir.path(), &cancel).await.unwrap();
    assert!(meta.is_dir);
  }
}
