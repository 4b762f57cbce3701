//! Open-document records and incremental text edits.
//!
//! Positions follow the editor protocol: zero-based lines, columns counted
//! in UTF-16 code units. Edits arrive either as full-text replacements or
//! as range replacements against the current text.

use crate::path::DocHandle;

/// Zero-based line/character position; character counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EditPos {
  pub line: u32,
  pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRange {
  pub start: EditPos,
  pub end: EditPos,
}

/// One change from a `didChange` notification.
#[derive(Debug, Clone)]
pub struct TextChange {
  /// `None` replaces the whole document.
  pub range: Option<EditRange>,
  pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
  #[error("position {line}:{character} is out of range")]
  InvalidPosition { line: u32, character: u32 },

  #[error("document version went backwards: {current} -> {proposed}")]
  VersionRegression { current: i32, proposed: i32 },
}

/// The request context threaded from the transport down into job bodies.
///
/// Carries the protocol method and document identity of the request that
/// triggered the work, so e.g. validation can revalidate only the file
/// named by a `didChange`.
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
  pub method: String,
  pub language_id: String,
  pub filename: String,
}

/// One open document owned by the document store.
#[derive(Debug, Clone)]
pub struct Document {
  pub handle: DocHandle,
  pub language_id: String,
  pub version: i32,
  pub text: String,
}

impl Document {
  pub fn new(handle: DocHandle, language_id: String, version: i32, text: String) -> Self {
    Self {
      handle,
      language_id,
      version,
      text,
    }
  }

  /// Applies a batch of changes in order and bumps the version.
  ///
  /// Versions are monotonically non-decreasing; an older version is
  /// rejected without touching the text.
  pub fn apply_changes(&mut self, changes: &[TextChange], version: i32) -> Result<(), DocumentError> {
    if version < self.version {
      return Err(DocumentError::VersionRegression {
        current: self.version,
        proposed: version,
      });
    }
    for change in changes {
      match change.range {
        None => self.text = change.text.clone(),
        Some(range) => {
          let start = byte_offset(&self.text, range.start)?;
          let end = byte_offset(&self.text, range.end)?;
          self.text.replace_range(start..end, &change.text);
        }
      }
    }
    self.version = version;
    Ok(())
  }
}

/// Translates a protocol position into a byte offset into `text`.
pub fn byte_offset(text: &str, pos: EditPos) -> Result<usize, DocumentError> {
  let invalid = || DocumentError::InvalidPosition {
    line: pos.line,
    character: pos.character,
  };

  let mut line = 0u32;
  let mut iter = text.char_indices().peekable();

  while line < pos.line {
    match iter.next() {
      Some((_, '\n')) => line += 1,
      Some(_) => {}
      None => return Err(invalid()),
    }
  }
  let mut offset = iter.peek().map(|(i, _)| *i).unwrap_or(text.len());

  let mut col = 0u32;
  while col < pos.character {
    match iter.next() {
      Some((_, '\n')) | None => return Err(invalid()),
      Some((i, c)) => {
        col += c.len_utf16() as u32;
        offset = i + c.len_utf8();
      }
    }
  }
  Ok(offset)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::path::DirHandle;

  fn doc(text: &str) -> Document {
    let handle = DirHandle::from_path("/mod").document("main.tf");
    Document::new(handle, "opentofu".into(), 0, text.into())
  }

  fn range(sl: u32, sc: u32, el: u32, ec: u32) -> EditRange {
    EditRange {
      start: EditPos { line: sl, character: sc },
      end: EditPos { line: el, character: ec },
    }
  }

  #[test]
  fn full_replacement() {
    let mut d = doc("old");
    d.apply_changes(
      &[TextChange {
        range: None,
        text: "new".into(),
      }],
      1,
    )
    .unwrap();
    assert_eq!(d.text, "new");
    assert_eq!(d.version, 1);
  }

  #[test]
  fn incremental_edit_mid_line() {
    let mut d = doc("provider \"github\" {}\n");
    d.apply_changes(
      &[TextChange {
        range: Some(range(0, 10, 0, 16)),
        text: "google".into(),
      }],
      1,
    )
    .unwrap();
    assert_eq!(d.text, "provider \"google\" {}\n");
  }

  #[test]
  fn edit_then_reverse_edit_restores_text() {
    let original = "variable \"x\" {\n  default = 1\n}\n";
    let mut d = doc(original);
    d.apply_changes(
      &[TextChange {
        range: Some(range(1, 12, 1, 13)),
        text: "42".into(),
      }],
      1,
    )
    .unwrap();
    assert_eq!(d.text, "variable \"x\" {\n  default = 42\n}\n");
    d.apply_changes(
      &[TextChange {
        range: Some(range(1, 12, 1, 14)),
        text: "1".into(),
      }],
      2,
    )
    .unwrap();
    assert_eq!(d.text, original);
  }

  #[test]
  fn utf16_columns() {
    // '😀' is two UTF-16 code units
    let mut d = doc("a = \"😀\"\n");
    d.apply_changes(
      &[TextChange {
        range: Some(range(0, 7, 0, 7)),
        text: "!".into(),
      }],
      1,
    )
    .unwrap();
    assert_eq!(d.text, "a = \"😀!\"\n");
  }

  #[test]
  fn version_regression_rejected() {
    let mut d = doc("x");
    d.version = 5;
    let err = d
      .apply_changes(
        &[TextChange {
          range: None,
          text: "y".into(),
        }],
        3,
      )
      .unwrap_err();
    assert!(matches!(err, DocumentError::VersionRegression { .. }));
    assert_eq!(d.text, "x");
  }
}
