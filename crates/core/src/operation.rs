//! Operation kinds and the per-stage state machine.
//!
//! Every module record carries one [`OpState`] per pipeline stage. The
//! transition discipline is `Unknown -> Loading -> {LoadedOk, LoadedErr}`;
//! only the job that won the `Unknown -> Loading` transition may move the
//! stage to a terminal state, and re-runs are forced through the
//! ignore-state flag which resets the stage to `Unknown` on entry.

use std::fmt;

/// The kind of work a job performs. Also the deduplication key together
/// with the owning directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
  ParseModuleConfiguration,
  LoadModuleMetadata,
  PreloadEmbeddedSchema,
  DecodeReferenceTargets,
  DecodeReferenceOrigins,
  SchemaModuleValidation,
  ReferenceValidation,
  GetModuleDataFromRegistry,
  ParseModuleManifest,
  GetToolVersion,
  ExternalToolValidate,
}

impl fmt::Display for OpType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      OpType::ParseModuleConfiguration => "parse-module-configuration",
      OpType::LoadModuleMetadata => "load-module-metadata",
      OpType::PreloadEmbeddedSchema => "preload-embedded-schema",
      OpType::DecodeReferenceTargets => "decode-reference-targets",
      OpType::DecodeReferenceOrigins => "decode-reference-origins",
      OpType::SchemaModuleValidation => "schema-module-validation",
      OpType::ReferenceValidation => "reference-validation",
      OpType::GetModuleDataFromRegistry => "get-module-data-from-registry",
      OpType::ParseModuleManifest => "parse-module-manifest",
      OpType::GetToolVersion => "get-tool-version",
      OpType::ExternalToolValidate => "external-tool-validate",
    };
    f.write_str(name)
  }
}

/// State of one pipeline stage on a module record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpState {
  #[default]
  Unknown,
  Loading,
  LoadedOk,
  LoadedErr,
}

impl OpState {
  pub fn is_terminal(self) -> bool {
    matches!(self, OpState::LoadedOk | OpState::LoadedErr)
  }

  pub fn from_result(ok: bool) -> Self {
    if ok { OpState::LoadedOk } else { OpState::LoadedErr }
  }
}

/// Origin of a diagnostics bag on a module record. Each source has its own
/// state tag so validation reruns replace only their own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSource {
  Parsing,
  ModuleCalls,
  SchemaValidation,
  ReferenceValidation,
  ExternalToolValidate,
}

impl fmt::Display for DiagnosticSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      DiagnosticSource::Parsing => "parsing",
      DiagnosticSource::ModuleCalls => "module-calls",
      DiagnosticSource::SchemaValidation => "schema-validation",
      DiagnosticSource::ReferenceValidation => "reference-validation",
      DiagnosticSource::ExternalToolValidate => "external-tool-validate",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states() {
    assert!(!OpState::Unknown.is_terminal());
    assert!(!OpState::Loading.is_terminal());
    assert!(OpState::LoadedOk.is_terminal());
    assert!(OpState::LoadedErr.is_terminal());
  }
}
