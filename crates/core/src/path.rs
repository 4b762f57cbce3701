//! Canonical path model.
//!
//! Every directory and document in the server is addressed by an absolute,
//! normalised path. On case-insensitive platforms the volume prefix is
//! lowercased so that `C:\mod` and `c:\mod` index the same record.

use std::{
  fmt,
  path::{Path, PathBuf},
};

/// Handle to a module directory.
///
/// Construction normalises the path; two handles compare equal iff they
/// address the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirHandle(PathBuf);

impl DirHandle {
  pub fn from_path(path: impl Into<PathBuf>) -> Self {
    Self(normalize_path(path.into()))
  }

  pub fn path(&self) -> &Path {
    &self.0
  }

  pub fn join(&self, rel: impl AsRef<Path>) -> DirHandle {
    DirHandle::from_path(self.0.join(rel))
  }

  /// Handle for a document inside this directory.
  pub fn document(&self, filename: impl Into<String>) -> DocHandle {
    DocHandle {
      dir: self.clone(),
      filename: filename.into(),
    }
  }
}

impl fmt::Display for DirHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.display())
  }
}

/// Handle to a single document, split into its owning directory and filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocHandle {
  pub dir: DirHandle,
  pub filename: String,
}

impl DocHandle {
  /// Splits an absolute file path into directory handle and filename.
  pub fn from_path(path: &Path) -> Option<Self> {
    let filename = path.file_name()?.to_str()?.to_string();
    let dir = DirHandle::from_path(path.parent()?);
    Some(Self { dir, filename })
  }

  pub fn full_path(&self) -> PathBuf {
    self.dir.path().join(&self.filename)
  }
}

impl fmt::Display for DocHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.full_path().display())
  }
}

/// Normalises a path: strips redundant `.` components, resolves `..`
/// lexically and lowercases the volume prefix where one exists.
pub fn normalize_path(path: PathBuf) -> PathBuf {
  use std::path::Component;

  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      Component::Prefix(prefix) => {
        let raw = prefix.as_os_str().to_string_lossy().to_lowercase();
        out.push(raw);
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dir_handle_normalises_dots() {
    let a = DirHandle::from_path("/work/mod/./sub/../sub");
    let b = DirHandle::from_path("/work/mod/sub");
    assert_eq!(a, b);
  }

  #[test]
  fn doc_handle_splits_path() {
    let handle = DocHandle::from_path(Path::new("/work/mod/main.tf")).unwrap();
    assert_eq!(handle.dir, DirHandle::from_path("/work/mod"));
    assert_eq!(handle.filename, "main.tf");
    assert_eq!(handle.full_path(), PathBuf::from("/work/mod/main.tf"));
  }

  #[test]
  fn join_resolves_relative_sources() {
    let root = DirHandle::from_path("/work/root");
    assert_eq!(root.join("./submodule"), DirHandle::from_path("/work/root/submodule"));
    assert_eq!(root.join("../sibling"), DirHandle::from_path("/work/sibling"));
  }
}
