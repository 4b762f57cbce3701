//! External tool facade.
//!
//! The infrastructure CLI is an optional collaborator: version probing,
//! `init` and `validate` shell out to it. A missing binary is a distinct
//! error carrying actionable guidance, never a crash.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
  process::Stdio,
};

use serde::Deserialize;
use tofuls_core::path::DirHandle;
use tofuls_syntax::{
  Diagnostic, Pos, Severity, Span,
  version::Version,
};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BINARY_NAME: &str = "tofu";

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
  #[error("Tofu (CLI) is required. Please install Tofu or make it available in $PATH")]
  Missing,

  #[error("tofu exited with status {status}: {stderr}")]
  Failed { status: i32, stderr: String },

  #[error("failed to run tofu: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to decode tofu output: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("operation cancelled")]
  Cancelled,
}

/// Handle to a discovered CLI binary.
#[derive(Debug, Clone)]
pub struct ToolExec {
  binary: PathBuf,
}

impl ToolExec {
  /// Finds the binary on `$PATH`.
  pub fn discover() -> Result<Self, ToolError> {
    let path_var = std::env::var_os("PATH").ok_or(ToolError::Missing)?;
    for dir in std::env::split_paths(&path_var) {
      let candidate = dir.join(exe_name());
      if candidate.is_file() {
        debug!(binary = %candidate.display(), "external tool found");
        return Ok(Self { binary: candidate });
      }
    }
    Err(ToolError::Missing)
  }

  pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
    Self { binary: binary.into() }
  }

  async fn run(&self, dir: &Path, args: &[&str], cancel: &CancellationToken) -> Result<Vec<u8>, ToolError> {
    let child = Command::new(&self.binary)
      .args(args)
      .current_dir(dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    let output = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        // kill_on_drop(true) above ensures the process is killed when `child`
        // (held by the other branch's future) is dropped here.
        return Err(ToolError::Cancelled);
      }
      output = child.wait_with_output() => output?,
    };

    if !output.status.success() {
      // validate exits non-zero when findings exist but still prints JSON
      if args.contains(&"-json") && !output.stdout.is_empty() {
        return Ok(output.stdout);
      }
      return Err(ToolError::Failed {
        status: output.status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      });
    }
    Ok(output.stdout)
  }

  /// Probes `tofu version -json`.
  pub async fn version(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Version, ToolError> {
    #[derive(Deserialize)]
    struct VersionOutput {
      terraform_version: String,
    }

    let stdout = self.run(dir.path(), &["version", "-json"], cancel).await?;
    let parsed: VersionOutput = serde_json::from_slice(&stdout)?;
    parsed
      .terraform_version
      .parse()
      .map_err(|_| ToolError::Decode(serde::de::Error::custom("unparseable version")))
  }

  pub async fn init(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<(), ToolError> {
    self.run(dir.path(), &["init", "-no-color", "-input=false"], cancel).await?;
    Ok(())
  }

  /// Runs `tofu validate -json` and maps its findings to per-file
  /// diagnostics.
  pub async fn validate(
    &self,
    dir: &DirHandle,
    cancel: &CancellationToken,
  ) -> Result<BTreeMap<String, Vec<Diagnostic>>, ToolError> {
    let stdout = self.run(dir.path(), &["validate", "-json"], cancel).await?;
    let parsed: ValidateOutput = serde_json::from_slice(&stdout)?;
    Ok(diags_from_validate(parsed))
  }
}

fn exe_name() -> String {
  if cfg!(windows) {
    format!("{BINARY_NAME}.exe")
  } else {
    BINARY_NAME.to_string()
  }
}

#[derive(Debug, Default, Deserialize)]
struct ValidateOutput {
  #[serde(default)]
  diagnostics: Vec<ValidateDiagnostic>,
}

#[derive(Debug, Deserialize)]
struct ValidateDiagnostic {
  #[serde(default)]
  severity: String,
  #[serde(default)]
  summary: String,
  #[serde(default)]
  detail: String,
  #[serde(default)]
  range: Option<ValidateRange>,
}

#[derive(Debug, Deserialize)]
struct ValidateRange {
  #[serde(default)]
  filename: String,
  start: ValidatePos,
  end: ValidatePos,
}

/// The CLI reports 1-based lines and columns.
#[derive(Debug, Deserialize)]
struct ValidatePos {
  line: u32,
  column: u32,
  #[serde(default)]
  byte: usize,
}

fn diags_from_validate(output: ValidateOutput) -> BTreeMap<String, Vec<Diagnostic>> {
  let mut by_file: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();
  for item in output.diagnostics {
    let Some(range) = item.range else {
      warn!(summary = %item.summary, "validate diagnostic without range dropped");
      continue;
    };
    let severity = if item.severity == "warning" {
      Severity::Warning
    } else {
      Severity::Error
    };
    let message = if item.detail.is_empty() {
      item.summary
    } else {
      format!("{}: {}", item.summary, item.detail)
    };
    by_file.entry(range.filename.clone()).or_default().push(Diagnostic {
      severity,
      message,
      span: Span {
        start: to_pos(&range.start),
        end: to_pos(&range.end),
      },
    });
  }
  by_file
}

fn to_pos(pos: &ValidatePos) -> Pos {
  Pos {
    line: pos.line.saturating_sub(1),
    character: pos.column.saturating_sub(1),
    byte: pos.byte,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_output_maps_to_diagnostics() {
    let raw = r#"{
      "valid": false,
      "diagnostics": [
        {
          "severity": "error",
          "summary": "Missing required argument",
          "detail": "The argument \"backend\" is required.",
          "range": {
            "filename": "main.tf",
            "start": { "line": 1, "column": 1, "byte": 0 },
            "end": { "line": 1, "column": 5, "byte": 4 }
          }
        },
        { "severity": "warning", "summary": "No range here" }
      ]
    }"#;
    let parsed: ValidateOutput = serde_json::from_str(raw).unwrap();
    let by_file = diags_from_validate(parsed);
    assert_eq!(by_file.len(), 1);
    let diag = &by_file["main.tf"][0];
    assert_eq!(diag.severity, Severity::Error);
    assert!(diag.message.contains("Missing required argument"));
    assert_eq!(diag.span.start.line, 0);
    assert_eq!(diag.span.start.character, 0);
  }

  #[test]
  fn missing_binary_has_actionable_message() {
    let err = ToolError::Missing;
    assert!(err.to_string().contains("$PATH"));
  }
}
