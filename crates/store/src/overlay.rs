//! Document-overlay filesystem.
//!
//! Wraps a base filesystem view so open-document text shadows what is on
//! disk: reads of an open path return the edited buffer, open files show
//! up in directory listings even before their first save, and a
//! directory that exists only as open buffers is still listable. The
//! whole decode pipeline runs against this view, which is how unsaved
//! `didChange` edits reach parsing, validation and the decoder.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tofuls_core::{
  document::Document,
  fsview::{DirEntry, FileMeta, FileSystem, FsError},
  path::{DirHandle, DocHandle},
};
use tokio_util::sync::CancellationToken;

use crate::DocumentStore;

pub struct DocumentOverlayFs {
  base: Arc<dyn FileSystem>,
  documents: DocumentStore,
}

impl DocumentOverlayFs {
  pub fn new(base: Arc<dyn FileSystem>, documents: DocumentStore) -> Self {
    Self { base, documents }
  }

  fn open_document_at(&self, path: &Path) -> Option<Document> {
    let handle = DocHandle::from_path(path)?;
    self.documents.get(&handle).ok()
  }
}

#[async_trait]
impl FileSystem for DocumentOverlayFs {
  async fn read_file(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<u8>, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    if let Some(doc) = self.open_document_at(path) {
      return Ok(doc.text.into_bytes());
    }
    self.base.read_file(path, cancel).await
  }

  async fn metadata(&self, path: &Path, cancel: &CancellationToken) -> Result<FileMeta, FsError> {
    if cancel.is_cancelled() {
      return Err(FsError::Cancelled);
    }
    if let Some(doc) = self.open_document_at(path) {
      return Ok(FileMeta {
        is_dir: false,
        len: doc.text.len() as u64,
      });
    }
    match self.base.metadata(path, cancel).await {
      Err(FsError::NotFound(missing)) => {
        let dir = DirHandle::from_path(path);
        if self.documents.has_open_documents(&dir) {
          Ok(FileMeta { is_dir: true, len: 0 })
        } else {
          Err(FsError::NotFound(missing))
        }
      }
      other => other,
    }
  }

  async fn read_dir(&self, path: &Path, cancel: &CancellationToken) -> Result<Vec<DirEntry>, FsError> {
    let dir = DirHandle::from_path(path);
    let open_docs = self.documents.list_in_dir(&dir);
    let mut entries = match self.base.read_dir(path, cancel).await {
      Ok(entries) => entries,
      Err(FsError::NotFound(_)) if !open_docs.is_empty() => Vec::new(),
      Err(err) => return Err(err),
    };
    for doc in open_docs {
      if !entries.iter().any(|e| e.name == doc.handle.filename) {
        entries.push(DirEntry {
          name: doc.handle.filename,
          is_dir: false,
        });
      }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;
  use tofuls_core::fsview::MemFileSystem;

  fn overlay_over(disk: MemFileSystem) -> (DocumentOverlayFs, DocumentStore) {
    let (store, _rx) = StateStore::new();
    let documents = store.documents();
    (DocumentOverlayFs::new(Arc::new(disk), documents.clone()), documents)
  }

  #[tokio::test]
  async fn buffer_text_shadows_disk() {
    let disk = MemFileSystem::new();
    disk.insert_file("/mod/main.tf", b"on disk".to_vec());
    let (fs, documents) = overlay_over(disk);
    let cancel = CancellationToken::new();

    let handle = DirHandle::from_path("/mod").document("main.tf");
    documents.open(handle.clone(), "opentofu", 0, "edited".into()).unwrap();

    let bytes = fs.read_file(Path::new("/mod/main.tf"), &cancel).await.unwrap();
    assert_eq!(bytes, b"edited");
    let meta = fs.metadata(Path::new("/mod/main.tf"), &cancel).await.unwrap();
    assert_eq!(meta.len, 6);

    // Closing the document falls back to the disk contents
    documents.close(&handle).unwrap();
    let bytes = fs.read_file(Path::new("/mod/main.tf"), &cancel).await.unwrap();
    assert_eq!(bytes, b"on disk");
  }

  #[tokio::test]
  async fn unsaved_files_appear_in_listings() {
    let disk = MemFileSystem::new();
    disk.insert_file("/mod/saved.tf", b"x".to_vec());
    let (fs, documents) = overlay_over(disk);
    let cancel = CancellationToken::new();

    documents
      .open(DirHandle::from_path("/mod").document("unsaved.tf"), "opentofu", 0, "y".into())
      .unwrap();

    let entries = fs.read_dir(Path::new("/mod"), &cancel).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["saved.tf", "unsaved.tf"]);
  }

  #[tokio::test]
  async fn buffer_only_directory_is_listable() {
    let (fs, documents) = overlay_over(MemFileSystem::new());
    let cancel = CancellationToken::new();

    documents
      .open(DirHandle::from_path("/ghost").document("main.tf"), "opentofu", 0, "z".into())
      .unwrap();

    let entries = fs.read_dir(Path::new("/ghost"), &cancel).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "main.tf");
    let meta = fs.metadata(Path::new("/ghost"), &cancel).await.unwrap();
    assert!(meta.is_dir);
  }
}
