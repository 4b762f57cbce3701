//! Conversions between core/source types and protocol structures.

use tofuls_core::{
  document::{EditPos, EditRange, TextChange},
  path::{DirHandle, DocHandle},
};
use tofuls_syntax::{Diagnostic, Pos, Severity, Span};
use tower_lsp::lsp_types::{
  self as lsp, DiagnosticSeverity, Position, Range, TextDocumentContentChangeEvent, Url,
};

#[derive(Debug, thiserror::Error)]
pub enum UriError {
  #[error("unsupported or invalid URI: {0:?}")]
  Invalid(String),
}

pub fn dir_handle_from_uri(uri: &Url) -> Result<DirHandle, UriError> {
  let path = uri
    .to_file_path()
    .map_err(|_| UriError::Invalid(uri.to_string()))?;
  Ok(DirHandle::from_path(path))
}

pub fn doc_handle_from_uri(uri: &Url) -> Result<DocHandle, UriError> {
  let path = uri
    .to_file_path()
    .map_err(|_| UriError::Invalid(uri.to_string()))?;
  DocHandle::from_path(&path).ok_or_else(|| UriError::Invalid(uri.to_string()))
}

pub fn uri_from_doc_handle(handle: &DocHandle) -> Option<Url> {
  Url::from_file_path(handle.full_path()).ok()
}

pub fn uri_from_dir_handle(dir: &DirHandle) -> Option<Url> {
  Url::from_file_path(dir.path()).ok()
}

/// A WSL UNC-style URI; clients get a dedicated error payload for these.
pub fn is_wsl_uri(uri: &str) -> bool {
  uri.starts_with("file://wsl%24/") || uri.starts_with("file://wsl.localhost/")
}

pub fn position(pos: Pos) -> Position {
  Position {
    line: pos.line,
    character: pos.character,
  }
}

pub fn range(span: Span) -> Range {
  Range {
    start: position(span.start),
    end: position(span.end),
  }
}

pub fn diagnostic(diag: &Diagnostic, source: &str) -> lsp::Diagnostic {
  lsp::Diagnostic {
    range: range(diag.span),
    severity: Some(match diag.severity {
      Severity::Error => DiagnosticSeverity::ERROR,
      Severity::Warning => DiagnosticSeverity::WARNING,
    }),
    source: Some(source.to_string()),
    message: diag.message.clone(),
    ..Default::default()
  }
}

pub fn text_changes(changes: &[TextDocumentContentChangeEvent]) -> Vec<TextChange> {
  changes
    .iter()
    .map(|change| TextChange {
      range: change.range.map(|r| EditRange {
        start: EditPos {
          line: r.start.line,
          character: r.start.character,
        },
        end: EditPos {
          line: r.end.line,
          character: r.end.character,
        },
      }),
      text: change.text.clone(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uri_round_trip() {
    let handle = DirHandle::from_path("/work/mod").document("main.tf");
    let uri = uri_from_doc_handle(&handle).unwrap();
    assert_eq!(doc_handle_from_uri(&uri).unwrap(), handle);
  }

  #[test]
  fn span_to_range() {
    let span = Span {
      start: Pos { line: 1, character: 2, byte: 10 },
      end: Pos { line: 1, character: 8, byte: 16 },
    };
    let r = range(span);
    assert_eq!(r.start, Position { line: 1, character: 2 });
    assert_eq!(r.end, Position { line: 1, character: 8 });
  }
}
