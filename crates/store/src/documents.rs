//! Open-document table.

use std::{collections::HashMap, sync::Arc};

use tofuls_core::{
  document::{Document, TextChange},
  path::{DirHandle, DocHandle},
};

use crate::{Inner, StoreError};

#[derive(Default, Clone)]
pub(crate) struct DocumentTable {
  pub(crate) records: HashMap<DocHandle, Document>,
}

/// Facade over the document table.
#[derive(Clone)]
pub struct DocumentStore {
  inner: Arc<Inner>,
}

impl DocumentStore {
  pub(crate) fn new(inner: Arc<Inner>) -> Self {
    Self { inner }
  }

  /// Registers (or replaces) an open document.
  pub fn open(&self, handle: DocHandle, language_id: &str, version: i32, text: String) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables.documents.records.insert(
        handle.clone(),
        Document::new(handle.clone(), language_id.to_string(), version, text),
      );
      Ok(())
    })
  }

  /// Applies incremental changes to an open document.
  pub fn change(&self, handle: &DocHandle, version: i32, changes: &[TextChange]) -> Result<Document, StoreError> {
    self.inner.write(|tables| {
      let doc = tables
        .documents
        .records
        .get_mut(handle)
        .ok_or_else(|| StoreError::DocumentNotFound(handle.to_string()))?;
      doc
        .apply_changes(changes, version)
        .map_err(|e| StoreError::Document(e.to_string()))?;
      Ok(doc.clone())
    })
  }

  pub fn close(&self, handle: &DocHandle) -> Result<(), StoreError> {
    self.inner.write(|tables| {
      tables
        .documents
        .records
        .remove(handle)
        .map(|_| ())
        .ok_or_else(|| StoreError::DocumentNotFound(handle.to_string()))
    })
  }

  /// Snapshot clone of a document.
  pub fn get(&self, handle: &DocHandle) -> Result<Document, StoreError> {
    self
      .inner
      .snapshot()
      .documents
      .records
      .get(handle)
      .cloned()
      .ok_or_else(|| StoreError::DocumentNotFound(handle.to_string()))
  }

  pub fn has_open_documents(&self, dir: &DirHandle) -> bool {
    self.inner.snapshot().documents.records.keys().any(|h| &h.dir == dir)
  }

  pub fn list_in_dir(&self, dir: &DirHandle) -> Vec<Document> {
    let mut docs: Vec<Document> = self
      .inner
      .snapshot()
      .documents
      .records
      .values()
      .filter(|d| &d.handle.dir == dir)
      .cloned()
      .collect();
    docs.sort_by(|a, b| a.handle.filename.cmp(&b.handle.filename));
    docs
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StateStore;
  use tofuls_core::document::{EditPos, EditRange};

  fn store() -> DocumentStore {
    StateStore::new().0.documents()
  }

  #[test]
  fn open_change_close_lifecycle() {
    let docs = store();
    let dir = DirHandle::from_path("/mod");
    let handle = dir.document("main.tf");

    docs.open(handle.clone(), "opentofu", 0, "a = 1\n".into()).unwrap();
    assert!(docs.has_open_documents(&dir));

    let changed = docs
      .change(
        &handle,
        1,
        &[TextChange {
          range: Some(EditRange {
            start: EditPos { line: 0, character: 4 },
            end: EditPos { line: 0, character: 5 },
          }),
          text: "2".into(),
        }],
      )
      .unwrap();
    assert_eq!(changed.text, "a = 2\n");
    assert_eq!(changed.version, 1);

    docs.close(&handle).unwrap();
    assert!(!docs.has_open_documents(&dir));
    assert!(docs.get(&handle).is_err());
  }

  #[test]
  fn failed_change_leaves_document_untouched() {
    let docs = store();
    let handle = DirHandle::from_path("/mod").document("main.tf");
    docs.open(handle.clone(), "opentofu", 3, "text".into()).unwrap();

    // A version regression aborts the transaction
    let err = docs.change(&handle, 1, &[]).unwrap_err();
    assert!(matches!(err, StoreError::Document(_)));
    let doc = docs.get(&handle).unwrap();
    assert_eq!(doc.version, 3);
    assert_eq!(doc.text, "text");
  }
}
