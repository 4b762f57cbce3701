//! Workspace commands.
//!
//! Every command name is optionally prefixed with the session's
//! `commandPrefix`. The removed `rootmodules` command keeps a handler
//! that answers method-not-found with a pointer to its replacement.

use std::sync::Arc;

use serde_json::{Value, json};
use tofuls_core::{operation::DiagnosticSource, path::DirHandle};
use tofuls_store::ModuleStage;
use tofuls_syntax::addr::ModuleSourceAddr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{protocol, session::Session};

pub const CMD_MODULE_CALLERS: &str = "module.callers";
pub const CMD_MODULE_CALLS: &str = "module.calls";
pub const CMD_MODULE_PROVIDERS: &str = "module.providers";
pub const CMD_MODULE_OPENTOFU: &str = "module.opentofu";
pub const CMD_INIT: &str = "tofu.init";
pub const CMD_VALIDATE: &str = "tofu.validate";

const REMOVED_ROOTMODULES: &str = "rootmodules";

const ALL_COMMANDS: &[&str] = &[
  CMD_MODULE_CALLERS,
  CMD_MODULE_CALLS,
  CMD_MODULE_PROVIDERS,
  CMD_MODULE_OPENTOFU,
  CMD_INIT,
  CMD_VALIDATE,
];

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
  #[error("command handler not found for {0:?}")]
  NotFound(String),

  #[error("REMOVED: use module.callers instead")]
  Removed,

  #[error("missing required argument {0:?}")]
  MissingArgument(&'static str),

  #[error("{0}")]
  Failed(String),
}

/// Advertised command names under the session prefix.
pub fn command_names(prefix: &str) -> Vec<String> {
  ALL_COMMANDS.iter().map(|name| prefixed(prefix, name)).collect()
}

fn prefixed(prefix: &str, name: &str) -> String {
  if prefix.is_empty() {
    name.to_string()
  } else {
    format!("{prefix}.{name}")
  }
}

/// Resolves a wire command name back to its base name.
fn resolve(prefix: &str, wire_name: &str) -> Option<&'static str> {
  ALL_COMMANDS
    .iter()
    .copied()
    .chain(std::iter::once(REMOVED_ROOTMODULES))
    .find(|name| prefixed(prefix, name) == wire_name)
}

/// Extracts the module URI argument. Arguments arrive either as
/// `{"uri": "..."}` objects or as `"uri=..."` strings.
fn uri_argument(args: &[Value]) -> Option<String> {
  for arg in args {
    match arg {
      Value::Object(map) => {
        if let Some(Value::String(uri)) = map.get("uri") {
          return Some(uri.clone());
        }
      }
      Value::String(s) => {
        if let Some(uri) = s.strip_prefix("uri=") {
          return Some(uri.to_string());
        }
      }
      _ => {}
    }
  }
  None
}

pub struct CommandHandler {
  session: Arc<Session>,
}

impl CommandHandler {
  pub fn new(session: Arc<Session>) -> Self {
    Self { session }
  }

  pub async fn execute(
    &self,
    wire_name: &str,
    args: &[Value],
    cancel: &CancellationToken,
  ) -> Result<Value, CommandError> {
    let prefix = self.session.command_prefix();
    let Some(base) = resolve(&prefix, wire_name) else {
      return Err(CommandError::NotFound(wire_name.to_string()));
    };
    debug!(command = base, "executing workspace command");

    if base == REMOVED_ROOTMODULES {
      return Err(CommandError::Removed);
    }

    let uri = uri_argument(args).ok_or(CommandError::MissingArgument("uri"))?;
    let parsed = tower_lsp::lsp_types::Url::parse(&uri).map_err(|e| CommandError::Failed(e.to_string()))?;
    let dir = protocol::dir_handle_from_uri(&parsed).map_err(|e| CommandError::Failed(e.to_string()))?;

    match base {
      CMD_MODULE_CALLS => self.module_calls(&dir, cancel).await,
      CMD_MODULE_CALLERS => self.module_callers(&dir).await,
      CMD_MODULE_PROVIDERS => self.module_providers(&dir, cancel).await,
      CMD_MODULE_OPENTOFU => self.module_opentofu(&dir, cancel).await,
      CMD_INIT => self.tool_init(&dir, cancel).await,
      CMD_VALIDATE => self.tool_validate(&dir, cancel).await,
      _ => Err(CommandError::NotFound(wire_name.to_string())),
    }
  }

  async fn module_calls(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Value, CommandError> {
    self
      .session
      .decoder
      .wait_for_dir(dir, cancel)
      .await
      .map_err(|e| CommandError::Failed(e.to_string()))?;
    let ctx = self
      .session
      .decoder
      .path_context(dir)
      .map_err(|e| CommandError::Failed(e.to_string()))?;

    let calls: Vec<Value> = ctx
      .module_calls
      .values()
      .map(|call| {
        let source_type = match &call.source {
          ModuleSourceAddr::Local(_) => "local",
          ModuleSourceAddr::Registry(_) => "registry",
          ModuleSourceAddr::Remote(_) => "remote",
        };
        json!({
          "name": call.local_name,
          "source_addr": call.source_string,
          "source_type": source_type,
          "installed_path": call.resolved_dir.as_ref().map(|d| d.to_string()),
        })
      })
      .collect();

    Ok(json!({ "v": 0, "module_calls": calls }))
  }

  async fn module_callers(&self, dir: &DirHandle) -> Result<Value, CommandError> {
    let mut callers = Vec::new();
    for record in self.session.store.modules().list() {
      for call in record.meta.module_calls.values() {
        let resolved = match &call.source {
          ModuleSourceAddr::Local(rel) => Some(record.dir.join(rel)),
          _ => self
            .session
            .roots
            .installed_module_path(&record.dir, &call.source_string)
            .map(|rel| record.dir.join(rel)),
        };
        if resolved.as_ref() == Some(dir) {
          callers.push(json!({ "uri": protocol::uri_from_dir_handle(&record.dir).map(|u| u.to_string()) }));
          break;
        }
      }
    }
    Ok(json!({ "v": 0, "callers": callers }))
  }

  async fn module_providers(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Value, CommandError> {
    self
      .session
      .decoder
      .wait_for_dir(dir, cancel)
      .await
      .map_err(|e| CommandError::Failed(e.to_string()))?;
    let record = self
      .session
      .store
      .modules()
      .record_by_path(dir)
      .map_err(|e| CommandError::Failed(e.to_string()))?;

    let mut requirements = serde_json::Map::new();
    for (addr, constraints) in record.meta.provider_requirements.iter() {
      requirements.insert(
        addr.to_string(),
        json!({
          "display_name": addr.type_name,
          "version_constraint": constraints.to_string(),
        }),
      );
    }
    Ok(json!({ "v": 0, "provider_requirements": requirements }))
  }

  async fn module_opentofu(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Value, CommandError> {
    self
      .session
      .decoder
      .wait_for_dir(dir, cancel)
      .await
      .map_err(|e| CommandError::Failed(e.to_string()))?;
    let record = self
      .session
      .store
      .modules()
      .record_by_path(dir)
      .map_err(|e| CommandError::Failed(e.to_string()))?;

    Ok(json!({
      "v": 0,
      "required_version": record.meta.core_requirements.as_ref().map(|c| c.to_string()),
      "discovered_version": self.session.roots.tool_version(dir).map(|v| v.to_string()),
    }))
  }

  async fn tool_init(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Value, CommandError> {
    let tool = self
      .session
      .roots
      .tool()
      .ok_or_else(|| CommandError::Failed(crate::tofu::ToolError::Missing.to_string()))?;
    tool
      .init(dir, cancel)
      .await
      .map_err(|e| CommandError::Failed(e.to_string()))?;
    Ok(Value::Null)
  }

  async fn tool_validate(&self, dir: &DirHandle, cancel: &CancellationToken) -> Result<Value, CommandError> {
    let tool = self
      .session
      .roots
      .tool()
      .ok_or_else(|| CommandError::Failed(crate::tofu::ToolError::Missing.to_string()))?;
    let diags = tool
      .validate(dir, cancel)
      .await
      .map_err(|e| CommandError::Failed(e.to_string()))?;

    let modules = self.session.store.modules();
    // Force the external-validate stage so repeated runs replace the bag
    modules
      .begin_operation(dir, ModuleStage::Diagnostics(DiagnosticSource::ExternalToolValidate), true)
      .and_then(|_| modules.update_diagnostics(dir, DiagnosticSource::ExternalToolValidate, diags))
      .map_err(|e| CommandError::Failed(e.to_string()))?;
    Ok(Value::Null)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prefixing() {
    assert_eq!(prefixed("", CMD_MODULE_CALLS), "module.calls");
    assert_eq!(prefixed("1", CMD_MODULE_CALLS), "1.module.calls");
    assert_eq!(resolve("1", "1.module.calls"), Some(CMD_MODULE_CALLS));
    assert_eq!(resolve("", "rootmodules"), Some(REMOVED_ROOTMODULES));
    assert_eq!(resolve("", "unknown.command"), None);
  }

  #[test]
  fn uri_argument_forms() {
    assert_eq!(
      uri_argument(&[json!({"uri": "file:///mod"})]),
      Some("file:///mod".to_string())
    );
    assert_eq!(uri_argument(&[json!("uri=file:///mod")]), Some("file:///mod".to_string()));
    assert_eq!(uri_argument(&[json!(42)]), None);
  }
}
